//! Admin subcommands

pub mod metadata;
pub mod study;
pub mod upload;

use anyhow::{Context, Result};
use genmedia_arena_common::{
    auth::create_token_provider, config::AppConfig, storage::create_object_store, ObjectStore,
};
use std::sync::Arc;

/// Bucket for admin writes: an explicit one, else the generated-images bucket
pub(crate) fn target_bucket(config: &AppConfig, bucket: Option<String>) -> Result<String> {
    bucket
        .or_else(|| config.storage.generated_bucket.clone())
        .or_else(|| config.storage.bucket.clone())
        .filter(|b| !b.trim().is_empty())
        .context("no bucket given and GENMEDIA_GENERATED_BUCKET is not set")
}

pub(crate) fn object_store(config: &AppConfig, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    let tokens = create_token_provider(&config.gcp)?;
    Ok(create_object_store(&config.storage, bucket, tokens)?)
}
