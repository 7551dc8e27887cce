//! Arena round and vote handlers

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::ImageView;
use crate::AppState;
use genmedia_arena_common::{
    arena::{Vote, VoteResult},
    errors::Result,
};

#[derive(Debug, Default, Deserialize)]
pub struct StudyQuery {
    pub study: Option<String>,
}

#[derive(Serialize)]
pub struct WelcomeResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct PromptResponse {
    pub study: String,
    pub prompt: String,
}

/// Request to start a round
#[derive(Debug, Default, Deserialize, Validate)]
pub struct RoundRequest {
    #[validate(length(min = 1, max = 128))]
    pub study: Option<String>,

    /// Prompt to use instead of a random one
    #[validate(length(max = 2000))]
    pub prompt: Option<String>,
}

#[derive(Serialize)]
pub struct RoundResponse {
    pub study: String,
    pub prompt: String,
    pub model1: String,
    pub model2: String,
    pub images: Vec<ImageView>,
}

/// A preference between the two images of a round
#[derive(Debug, Deserialize, Validate)]
pub struct VoteRequest {
    #[validate(length(min = 1, max = 128))]
    pub study: Option<String>,

    #[validate(length(min = 1, max = 2000))]
    pub prompt: String,

    #[validate(length(min = 1, max = 256))]
    pub model1: String,

    #[validate(length(min = 1, max = 256))]
    pub model2: String,

    #[validate(length(min = 1, max = 1024))]
    pub image1: String,

    #[validate(length(min = 1, max = 1024))]
    pub image2: String,

    #[validate(length(min = 1, max = 256))]
    pub winner: String,
}

/// Greeting for the arena page
pub async fn welcome(State(state): State<AppState>) -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        message: state.arena.welcome_message().await,
    })
}

/// A random prompt from a study's prompt list
pub async fn random_prompt(
    State(state): State<AppState>,
    Query(query): Query<StudyQuery>,
) -> Result<Json<PromptResponse>> {
    let label = query
        .study
        .unwrap_or_else(|| state.arena.default_study().to_string());
    let study = state.arena.study(&label).await?;
    let prompt = state.arena.random_prompt(&study).await;

    Ok(Json(PromptResponse {
        study: study.label,
        prompt,
    }))
}

/// Start a round with two images from two different models
pub async fn new_round(
    State(state): State<AppState>,
    request: Option<Json<RoundRequest>>,
) -> Result<Json<RoundResponse>> {
    // A bodiless POST starts a round in the default study
    let request = request.map(|Json(r)| r).unwrap_or_default();
    request.validate()?;

    let round = state
        .arena
        .new_round(request.study.as_deref(), request.prompt)
        .await?;

    let prefix = &state.config.storage.public_url_prefix;
    Ok(Json(RoundResponse {
        study: round.study,
        prompt: round.prompt,
        model1: round.model1,
        model2: round.model2,
        images: round
            .images
            .into_iter()
            .map(|image| ImageView::new(image, prefix))
            .collect(),
    }))
}

/// Record a vote and return the updated ratings of both models
pub async fn vote(
    State(state): State<AppState>,
    Json(request): Json<VoteRequest>,
) -> Result<Json<VoteResult>> {
    request.validate()?;

    let study = request
        .study
        .unwrap_or_else(|| state.arena.default_study().to_string());

    let result = state
        .arena
        .record_vote(Vote {
            study,
            prompt: request.prompt,
            model1: request.model1,
            model2: request.model2,
            image1: request.image1,
            image2: request.image2,
            winner: request.winner,
        })
        .await?;

    Ok(Json(result))
}
