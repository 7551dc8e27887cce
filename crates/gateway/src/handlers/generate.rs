//! Ad hoc multi-model generation

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::ImageView;
use crate::AppState;
use genmedia_arena_common::errors::Result;

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateRequest {
    #[validate(length(min = 1, max = 2000))]
    pub prompt: String,

    /// Arena labels of the models to run
    #[validate(length(min = 1, max = 8))]
    pub models: Vec<String>,

    #[validate(length(min = 3, max = 8))]
    pub aspect_ratio: Option<String>,
}

#[derive(Serialize)]
pub struct GenerateResponse {
    pub prompt: String,
    pub requested: usize,
    pub images: Vec<ImageView>,
}

/// Run one prompt through several models; failed models are left out
pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>> {
    request.validate()?;

    let images = state
        .arena
        .generate(&request.models, &request.prompt, request.aspect_ratio.as_deref())
        .await?;

    tracing::info!(
        requested = request.models.len(),
        returned = images.len(),
        "Generation finished"
    );

    let prefix = &state.config.storage.public_url_prefix;
    Ok(Json(GenerateResponse {
        requested: request.models.len(),
        prompt: request.prompt,
        images: images
            .into_iter()
            .map(|image| ImageView::new(image, prefix))
            .collect(),
    }))
}
