//! Bulk upload of a local directory tree

use anyhow::{bail, Result};
use clap::Args;
use futures::stream::{self, StreamExt};
use genmedia_arena_common::{
    config::AppConfig,
    storage::{mime_type_for, object_path},
    ObjectStore,
};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Local directory to upload, recursively
    #[arg(long)]
    pub source_dir: PathBuf,

    /// Object name prefix in the bucket
    #[arg(long, default_value = "")]
    pub prefix: String,

    /// Bucket to upload to (defaults to the generated-images bucket)
    #[arg(long)]
    pub bucket: Option<String>,

    /// File extensions to include, comma separated; empty for all files
    #[arg(long, value_delimiter = ',', default_value = "json,png")]
    pub extensions: Vec<String>,

    /// Leave objects that already exist untouched
    #[arg(long)]
    pub skip_if_exists: bool,

    /// Parallel uploads
    #[arg(long, default_value_t = 8)]
    pub workers: usize,
}

#[derive(Debug, Default)]
pub struct UploadReport {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: Vec<(String, String)>,
}

enum FileOutcome {
    Uploaded,
    Skipped,
}

pub async fn run(config: &AppConfig, args: UploadArgs) -> Result<()> {
    let bucket = super::target_bucket(config, args.bucket.clone())?;
    let store = super::object_store(config, &bucket)?;

    let report = upload_dir(store.as_ref(), &args).await?;

    for (file, reason) in &report.failed {
        error!(file = %file, error = %reason, "Upload failed");
    }
    info!(
        bucket = %bucket,
        uploaded = report.uploaded,
        skipped = report.skipped,
        failed = report.failed.len(),
        "Upload completed"
    );
    Ok(())
}

/// Upload every matching file under `source_dir`; per-file failures are
/// collected in the report
pub async fn upload_dir(store: &dyn ObjectStore, args: &UploadArgs) -> Result<UploadReport> {
    if !args.source_dir.is_dir() {
        bail!("Directory {} is not found", args.source_dir.display());
    }

    let extensions: Vec<String> = args
        .extensions
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect();

    let files = collect_files(&args.source_dir, &extensions)?;
    info!(count = files.len(), dir = %args.source_dir.display(), "Starting upload");

    let results: Vec<(String, Result<FileOutcome>)> = stream::iter(files)
        .map(|relative| async move {
            let name = object_path(&args.prefix, &relative);
            let outcome = upload_file(store, &args.source_dir, &relative, &name, args.skip_if_exists).await;
            (relative, outcome)
        })
        .buffer_unordered(args.workers.max(1))
        .collect()
        .await;

    let mut report = UploadReport::default();
    for (file, outcome) in results {
        match outcome {
            Ok(FileOutcome::Uploaded) => report.uploaded += 1,
            Ok(FileOutcome::Skipped) => report.skipped += 1,
            Err(e) => report.failed.push((file, e.to_string())),
        }
    }
    Ok(report)
}

async fn upload_file(
    store: &dyn ObjectStore,
    root: &Path,
    relative: &str,
    object_name: &str,
    skip_if_exists: bool,
) -> Result<FileOutcome> {
    if skip_if_exists && store.exists(object_name).await? {
        debug!(object = object_name, "Already exists, skipping");
        return Ok(FileOutcome::Skipped);
    }

    let bytes = tokio::fs::read(root.join(relative)).await?;
    store.put(object_name, mime_type_for(relative), bytes).await?;
    debug!(object = object_name, "Uploaded");
    Ok(FileOutcome::Uploaded)
}

/// Files under `root` as `/`-separated relative paths, sorted. Symlinks are
/// not followed.
fn collect_files(root: &Path, extensions: &[String]) -> Result<Vec<String>> {
    let mut files = Vec::new();

    let entries = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file());

    for entry in entries {
        let path = entry.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !extensions.is_empty() && !extensions.contains(&ext) {
            continue;
        }

        let relative = path.strip_prefix(root)?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        files.push(parts.join("/"));
    }

    files.sort();
    Ok(files)
}
