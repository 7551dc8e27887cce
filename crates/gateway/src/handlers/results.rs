//! Leaderboard, vote history and study listing

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::arena::StudyQuery;
use crate::AppState;
use genmedia_arena_common::{
    arena::Leaderboard,
    db::models::{Study, VoteRecord},
    errors::Result,
    storage::public_url,
};

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub study: Option<String>,
    pub limit: Option<u64>,
}

#[derive(Serialize)]
pub struct HistoryEntry {
    pub study: String,
    pub prompt: String,
    pub model1: String,
    pub model2: String,
    pub image1_url: String,
    pub image2_url: String,
    pub winner: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub study: String,
    pub votes: Vec<HistoryEntry>,
}

#[derive(Serialize)]
pub struct StudiesResponse {
    pub studies: Vec<Study>,
}

/// Ratings of a study, highest first
pub async fn leaderboard(
    State(state): State<AppState>,
    Query(query): Query<StudyQuery>,
) -> Result<Json<Leaderboard>> {
    let study = query
        .study
        .unwrap_or_else(|| state.arena.default_study().to_string());
    Ok(Json(state.arena.leaderboard(&study).await?))
}

/// Most recent votes of a study
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>> {
    let study = query
        .study
        .unwrap_or_else(|| state.arena.default_study().to_string());
    let prefix = &state.config.storage.public_url_prefix;

    let votes = state
        .arena
        .history(&study, query.limit)
        .await?
        .into_iter()
        .map(|vote: VoteRecord| HistoryEntry {
            image1_url: public_url(&vote.image1, prefix),
            image2_url: public_url(&vote.image2, prefix),
            study: vote.study,
            prompt: vote.prompt,
            model1: vote.model1,
            model2: vote.model2,
            winner: vote.winner,
            timestamp: vote.timestamp,
        })
        .collect();

    Ok(Json(HistoryResponse { study, votes }))
}

/// Available studies, `live` first
pub async fn studies(State(state): State<AppState>) -> Result<Json<StudiesResponse>> {
    Ok(Json(StudiesResponse {
        studies: state.arena.studies().await?,
    }))
}
