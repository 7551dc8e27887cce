//! Arena rounds, votes and rankings
//!
//! A round shows the same prompt rendered by two models sampled from a
//! study. The `live` study generates both images on demand; stored studies
//! pick from images generated ahead of time. A vote updates the study's ELO
//! ratings and is appended to the vote log.

use crate::config::ArenaConfig;
use crate::db::models::{EloRatingRecord, Study, VoteRecord};
use crate::db::ArenaStore;
use crate::dispatch::dispatch;
use crate::elo::Outcome;
use crate::errors::{AppError, Result};
use crate::generation::{GeneratedImage, ModelRegistry, WELCOME_PROMPT};
use crate::prompts::PromptManager;
use crate::{metrics, LIVE_STUDY};
use chrono::Utc;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Most votes returned by one history query
pub const MAX_HISTORY_LIMIT: u64 = 100;

/// Two models and their images for one prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub study: String,
    pub prompt: String,
    pub model1: String,
    pub model2: String,
    pub images: Vec<GeneratedImage>,
}

/// A user's preference between the two images of a round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub study: String,
    pub prompt: String,
    pub model1: String,
    pub model2: String,
    pub image1: String,
    pub image2: String,
    pub winner: String,
}

impl Vote {
    fn outcome(&self) -> Result<Outcome> {
        if self.model1 == self.model2 {
            return Err(AppError::Validation {
                message: "a vote compares two different models".to_string(),
                field: Some("model2".to_string()),
            });
        }

        if self.winner == self.model1 {
            Ok(Outcome::FirstWins)
        } else if self.winner == self.model2 {
            Ok(Outcome::SecondWins)
        } else {
            Err(AppError::Validation {
                message: format!(
                    "winner `{}` must be one of `{}` and `{}`",
                    self.winner, self.model1, self.model2
                ),
                field: Some("winner".to_string()),
            })
        }
    }
}

/// Ratings of the two compared models after a vote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResult {
    pub study: String,
    pub winner: String,
    pub ratings: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub model: String,
    pub rating: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaderboard {
    pub study: String,
    pub entries: Vec<LeaderboardEntry>,
}

pub struct ArenaService {
    store: Arc<dyn ArenaStore>,
    registry: ModelRegistry,
    prompts: PromptManager,
    settings: ArenaConfig,
    aspect_ratio: String,
    study_prompts: RwLock<HashMap<String, PromptManager>>,
    // Serialises the read-modify-write of ratings within this process
    vote_lock: Mutex<()>,
}

impl ArenaService {
    pub fn new(
        store: Arc<dyn ArenaStore>,
        registry: ModelRegistry,
        prompts: PromptManager,
        settings: ArenaConfig,
        aspect_ratio: &str,
    ) -> Self {
        Self {
            store,
            registry,
            prompts,
            settings,
            aspect_ratio: aspect_ratio.to_string(),
            study_prompts: RwLock::new(HashMap::new()),
            vote_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ArenaStore> {
        &self.store
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn default_study(&self) -> &str {
        &self.settings.default_study
    }

    fn live_study(&self) -> Study {
        Study {
            label: LIVE_STUDY.to_string(),
            prompts_location: self.settings.prompts_path.clone(),
            models: self.registry.names(),
            created_at: Utc::now(),
        }
    }

    /// The built-in live study followed by stored studies
    pub async fn studies(&self) -> Result<Vec<Study>> {
        let mut studies = vec![self.live_study()];
        studies.extend(
            self.store
                .list_studies()
                .await?
                .into_iter()
                .filter(|s| s.label != LIVE_STUDY),
        );
        Ok(studies)
    }

    /// Look up a study by label
    pub async fn study(&self, label: &str) -> Result<Study> {
        if label == LIVE_STUDY {
            return Ok(self.live_study());
        }

        self.store
            .list_studies()
            .await?
            .into_iter()
            .find(|s| s.label == label)
            .ok_or_else(|| AppError::StudyNotFound {
                label: label.to_string(),
            })
    }

    /// A random prompt from the study's prompt file
    pub async fn random_prompt(&self, study: &Study) -> String {
        if study.prompts_location == self.settings.prompts_path || study.prompts_location.is_empty() {
            return self.prompts.random_prompt();
        }

        if let Some(prompts) = self.study_prompts.read().await.get(&study.prompts_location) {
            return prompts.random_prompt();
        }

        let prompts = PromptManager::load(&study.prompts_location).await;
        let prompt = prompts.random_prompt();
        self.study_prompts
            .write()
            .await
            .insert(study.prompts_location.clone(), prompts);
        prompt
    }

    /// Start a round: pick a prompt and two distinct models, then fetch
    /// their images
    pub async fn new_round(&self, study: Option<&str>, prompt: Option<String>) -> Result<Round> {
        let study = self.study(study.unwrap_or(self.default_study())).await?;

        let prompt = match prompt.filter(|p| !p.trim().is_empty()) {
            Some(prompt) => prompt,
            None => self.random_prompt(&study).await,
        };

        let candidates = if study.models.is_empty() {
            self.registry.names()
        } else {
            study.models.clone()
        };

        let (model1, model2) = pick_pair(&candidates).ok_or_else(|| AppError::Validation {
            message: format!("study `{}` needs at least two models", study.label),
            field: Some("study".to_string()),
        })?;

        tracing::info!(study = %study.label, model1 = %model1, model2 = %model2, "New round");

        let images = if study.label == LIVE_STUDY {
            let generators = self.registry.resolve(&[model1.clone(), model2.clone()])?;
            let images = dispatch(
                generators,
                &prompt,
                &self.aspect_ratio,
                self.settings.dispatch_workers,
            )
            .await;
            if images.len() < 2 {
                tracing::warn!(images = images.len(), "Live round is missing images");
            }
            images
        } else {
            vec![
                self.stored_image(&model1, &prompt).await?,
                self.stored_image(&model2, &prompt).await?,
            ]
        };

        Ok(Round {
            study: study.label,
            prompt,
            model1,
            model2,
            images,
        })
    }

    /// A random previously generated image of `model` for `prompt`
    async fn stored_image(&self, model: &str, prompt: &str) -> Result<GeneratedImage> {
        let found = self.store.find_images(prompt, model).await?;

        found
            .choose(&mut rand::thread_rng())
            .map(|image| GeneratedImage {
                model: model.to_string(),
                uri: image.gcsuri.clone(),
            })
            .ok_or_else(|| AppError::NoStoredImage {
                model: model.to_string(),
                prompt: prompt.to_string(),
            })
    }

    /// Apply a vote to the study's ratings, then append it to the vote log
    ///
    /// The two writes are sequential and not transactional: a failure after
    /// the ratings are saved leaves the vote unlogged.
    pub async fn record_vote(&self, vote: Vote) -> Result<VoteResult> {
        let outcome = vote.outcome()?;
        self.study(&vote.study).await?;

        let _guard = self.vote_lock.lock().await;

        let mut record = self
            .store
            .latest_ratings(&vote.study)
            .await?
            .unwrap_or_else(|| EloRatingRecord::empty(&vote.study));

        let (r1, r2) = record.ratings.apply(
            &vote.model1,
            &vote.model2,
            outcome,
            self.settings.elo_k_factor,
        );
        record.timestamp = Utc::now();
        self.store.save_ratings(&record).await?;

        self.store
            .append_vote(&VoteRecord {
                study: vote.study.clone(),
                model1: vote.model1.clone(),
                model2: vote.model2.clone(),
                image1: vote.image1,
                image2: vote.image2,
                winner: vote.winner.clone(),
                prompt: vote.prompt,
                timestamp: record.timestamp,
            })
            .await?;

        metrics::record_vote(&vote.study, &vote.winner);
        tracing::info!(
            study = %vote.study,
            winner = %vote.winner,
            model1 = %vote.model1,
            rating1 = r1,
            model2 = %vote.model2,
            rating2 = r2,
            "Vote recorded"
        );

        Ok(VoteResult {
            study: vote.study,
            winner: vote.winner,
            ratings: BTreeMap::from([(vote.model1, r1), (vote.model2, r2)]),
        })
    }

    /// Ratings of a study, highest first
    pub async fn leaderboard(&self, study: &str) -> Result<Leaderboard> {
        self.study(study).await?;

        let entries = self
            .store
            .latest_ratings(study)
            .await?
            .map(|record| record.ratings.ranked())
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(idx, (model, rating))| LeaderboardEntry {
                rank: idx + 1,
                model,
                rating,
            })
            .collect();

        Ok(Leaderboard {
            study: study.to_string(),
            entries,
        })
    }

    /// Latest votes of a study, newest first
    pub async fn history(&self, study: &str, limit: Option<u64>) -> Result<Vec<VoteRecord>> {
        self.study(study).await?;
        let limit = limit
            .unwrap_or(self.settings.history_limit)
            .clamp(1, MAX_HISTORY_LIMIT);
        self.store.latest_votes(study, limit).await
    }

    /// Generate `prompt` with each of `models`
    pub async fn generate(
        &self,
        models: &[String],
        prompt: &str,
        aspect_ratio: Option<&str>,
    ) -> Result<Vec<GeneratedImage>> {
        let generators = self.registry.resolve(models)?;
        Ok(dispatch(
            generators,
            prompt,
            aspect_ratio.unwrap_or(&self.aspect_ratio),
            self.settings.dispatch_workers,
        )
        .await)
    }

    /// Greeting shown on the arena page
    pub async fn welcome_message(&self) -> String {
        self.registry.text().generate_text(WELCOME_PROMPT).await
    }
}

/// Two distinct entries, in random order
fn pick_pair(candidates: &[String]) -> Option<(String, String)> {
    let mut unique: Vec<&String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }

    let picked: Vec<&&String> = unique.choose_multiple(&mut rand::thread_rng(), 2).collect();
    match picked.as_slice() {
        [a, b] => Some(((**a).clone(), (**b).clone())),
        _ => None,
    }
}
