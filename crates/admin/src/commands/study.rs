//! Collection setup and study registration

use anyhow::{bail, Result};
use chrono::Utc;
use clap::Args;
use genmedia_arena_common::{
    config::AppConfig,
    db::{create_store, models::Study},
    ArenaStore, LIVE_STUDY,
};
use tracing::info;

#[derive(Args, Debug)]
pub struct AddStudyArgs {
    /// Study label used in API queries
    #[arg(long)]
    pub label: String,

    /// Prompt file of the study
    #[arg(long)]
    pub prompts_location: String,

    /// Models compared in the study, comma separated
    #[arg(long, value_delimiter = ',')]
    pub models: Vec<String>,
}

/// Create the collections; safe to run repeatedly
pub async fn init_db(config: &AppConfig) -> Result<()> {
    let store = create_store(config).await?;
    store.ensure_schema().await?;
    info!(
        images = %config.collections.images,
        ratings = %config.collections.ratings,
        studies = %config.collections.studies,
        "Collections ready"
    );
    Ok(())
}

pub async fn add_study(config: &AppConfig, args: AddStudyArgs) -> Result<()> {
    let store = create_store(config).await?;
    let study = register_study(store.as_ref(), args).await?;
    info!(label = %study.label, models = ?study.models, "Study added");
    Ok(())
}

pub(crate) async fn register_study(store: &dyn ArenaStore, args: AddStudyArgs) -> Result<Study> {
    let label = args.label.trim().to_string();
    if label.is_empty() {
        bail!("study label must not be empty");
    }
    if label == LIVE_STUDY {
        bail!("`{}` is reserved for live generation", LIVE_STUDY);
    }
    if store.list_studies().await?.iter().any(|s| s.label == label) {
        bail!("study `{}` already exists", label);
    }

    let models: Vec<String> = args
        .models
        .into_iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();
    if models.len() == 1 {
        bail!("a study compares at least two models");
    }

    let study = Study {
        label,
        prompts_location: args.prompts_location,
        models,
        created_at: Utc::now(),
    };
    store.add_study(&study).await?;
    Ok(study)
}
