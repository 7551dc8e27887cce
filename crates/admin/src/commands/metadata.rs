//! Image metadata loading for pre-generated studies
//!
//! The input maps a top-level key to `[prompt, [image, ...]]` entries. One
//! metadata document is written per entry, pointing at its first image.

use anyhow::{Context, Result};
use clap::Args;
use genmedia_arena_common::{
    config::AppConfig,
    db::{create_store, models::ImageMetadata},
    storage::object_path,
    ArenaStore,
};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct LoadMetadataArgs {
    /// JSON file with prompt/image entries
    #[arg(long)]
    pub json_file: PathBuf,

    /// Key holding the entries
    #[arg(long, default_value = "stable_diffusion")]
    pub top_level_key: String,

    /// Folder of the images inside the bucket
    #[arg(long, default_value = "stablediffusion")]
    pub gcs_sub_folder: String,

    /// Model name recorded on each image (defaults to the Stable Diffusion model)
    #[arg(long)]
    pub model_name: Option<String>,

    /// Bucket holding the images (defaults to the generated-images bucket)
    #[arg(long)]
    pub bucket: Option<String>,
}

pub async fn run(config: &AppConfig, args: LoadMetadataArgs) -> Result<()> {
    let raw = tokio::fs::read_to_string(&args.json_file)
        .await
        .with_context(|| format!("failed to read {}", args.json_file.display()))?;
    let json: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", args.json_file.display()))?;

    let bucket = super::target_bucket(config, args.bucket.clone())?;
    let model = args
        .model_name
        .clone()
        .unwrap_or_else(|| config.models.stable_diffusion.clone());

    let store = create_store(config).await?;
    let loaded = load_entries(
        store.as_ref(),
        &json,
        &args.top_level_key,
        &bucket,
        &args.gcs_sub_folder,
        &model,
    )
    .await?;

    info!(count = loaded, model = %model, "Metadata loaded");
    Ok(())
}

/// Write one metadata document per well-formed entry; returns how many were written
pub(crate) async fn load_entries(
    store: &dyn ArenaStore,
    json: &Value,
    top_level_key: &str,
    bucket: &str,
    sub_folder: &str,
    model: &str,
) -> Result<usize> {
    let entries = json
        .get(top_level_key)
        .and_then(Value::as_array)
        .with_context(|| format!("key `{}` is missing or not a list", top_level_key))?;

    let mut loaded = 0;
    for (index, entry) in entries.iter().enumerate() {
        let Some((prompt, image)) = parse_entry(entry) else {
            warn!(index, "Skipping malformed entry");
            continue;
        };

        let uri = format!("gs://{}/{}", bucket, object_path(sub_folder, image));
        store
            .add_image_metadata(&ImageMetadata::new(uri, prompt, model))
            .await?;
        loaded += 1;
    }
    Ok(loaded)
}

fn parse_entry(entry: &Value) -> Option<(&str, &str)> {
    let pair = entry.as_array()?;
    let prompt = pair.first()?.as_str()?;
    let image = pair.get(1)?.as_array()?.first()?.as_str()?;
    if prompt.trim().is_empty() || image.is_empty() {
        return None;
    }
    Some((prompt, image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use genmedia_arena_common::db::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_load_entries() {
        let store = InMemoryStore::new();
        let json = json!({
            "stable_diffusion": [
                ["a red fox in snow", ["fox_0.png", "fox_1.png"]],
                ["a lighthouse at dusk", ["lighthouse_0.png"]],
                ["missing images", []],
                "not a pair"
            ]
        });

        let loaded = load_entries(&store, &json, "stable_diffusion", "generated", "stablediffusion", "sd-xl")
            .await
            .unwrap();
        assert_eq!(loaded, 2);

        let images = store.find_images("a red fox in snow", "sd-xl").await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].gcsuri, "gs://generated/stablediffusion/fox_0.png");
    }

    #[tokio::test]
    async fn test_missing_top_level_key() {
        let store = InMemoryStore::new();
        let json = json!({ "imagen": [] });
        tokio_test::assert_err!(load_entries(&store, &json, "stable_diffusion", "b", "f", "m").await);
    }

    #[test]
    fn test_parse_entry() {
        assert_eq!(
            parse_entry(&json!(["p", ["x.png"]])),
            Some(("p", "x.png"))
        );
        assert_eq!(parse_entry(&json!([" ", ["x.png"]])), None);
        assert_eq!(parse_entry(&json!(["p"])), None);
    }
}
