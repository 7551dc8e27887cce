//! Object storage for generated and uploaded images
//!
//! Objects are addressed as `bucket/path`; `gs://` URIs and public HTTPS
//! URLs are derived from that form.

mod gcs;

pub use gcs::GcsObjectStore;

use crate::auth::TokenProvider;
use crate::config::StorageConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Write-once blob storage keyed by object name
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket objects are written to
    fn bucket(&self) -> &str;

    /// Write `bytes` under `object_name`
    async fn put(&self, object_name: &str, mime_type: &str, bytes: Vec<u8>) -> Result<()>;

    /// Whether an object with this name already exists
    async fn exists(&self, object_name: &str) -> Result<bool>;

    /// Store `bytes` as `folder/file_name`, returning `bucket/folder/file_name`
    async fn upload(
        &self,
        folder: &str,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        let object_name = object_path(folder, file_name);
        self.put(&object_name, mime_type, bytes).await?;
        Ok(format!("{}/{}", self.bucket(), object_name))
    }
}

/// Join a folder and a file name, tolerating empty folders and stray slashes
pub fn object_path(folder: &str, file_name: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        file_name.trim_start_matches('/').to_string()
    } else {
        format!("{}/{}", folder, file_name.trim_start_matches('/'))
    }
}

/// Upload text contents, base64-decoding them first when `decode` is set
pub async fn store_contents(
    store: &dyn ObjectStore,
    folder: &str,
    file_name: &str,
    mime_type: &str,
    contents: &str,
    decode: bool,
) -> Result<String> {
    let bytes = if decode {
        STANDARD
            .decode(contents.trim())
            .map_err(|e| AppError::InvalidFormat {
                message: format!("contents are not valid base64: {}", e),
            })?
    } else {
        contents.as_bytes().to_vec()
    };

    store.upload(folder, file_name, mime_type, bytes).await
}

/// `gs://` URI for a `bucket/path` location
pub fn gs_uri(location: &str) -> String {
    if location.starts_with("gs://") {
        location.to_string()
    } else {
        format!("gs://{}", location)
    }
}

/// Browser-reachable URL for a stored image
pub fn public_url(uri: &str, prefix: &str) -> String {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return uri.to_string();
    }
    let location = uri.strip_prefix("gs://").unwrap_or(uri);
    format!("{}/{}", prefix.trim_end_matches('/'), location)
}

/// MIME type guessed from a file extension
pub fn mime_type_for(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Object store held in memory, for development and tests
pub struct InMemoryObjectStore {
    bucket: String,
    objects: RwLock<HashMap<String, (String, Vec<u8>)>>,
}

impl InMemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Stored MIME type and bytes of an object
    pub async fn get(&self, object_name: &str) -> Option<(String, Vec<u8>)> {
        self.objects.read().await.get(object_name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, object_name: &str, mime_type: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects
            .write()
            .await
            .insert(object_name.to_string(), (mime_type.to_string(), bytes));
        Ok(())
    }

    async fn exists(&self, object_name: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(object_name))
    }
}

/// Create an object store writing to `bucket` with the configured provider
pub fn create_object_store(
    config: &StorageConfig,
    bucket: &str,
    tokens: Arc<dyn TokenProvider>,
) -> Result<Arc<dyn ObjectStore>> {
    match config.provider.as_str() {
        "gcs" => Ok(Arc::new(GcsObjectStore::new(&config.api_base, bucket, tokens)?)),
        "memory" => {
            tracing::warn!(bucket = bucket, "Using in-memory object storage");
            Ok(Arc::new(InMemoryObjectStore::new(bucket)))
        }
        other => Err(AppError::Configuration {
            message: format!("Unknown storage provider `{}`", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_contents_decodes_base64() {
        let store = InMemoryObjectStore::new("genmedia");
        let encoded = STANDARD.encode(b"\x89PNG fake");

        let location = store_contents(&store, "flux1", "a.png", "image/png", &encoded, true)
            .await
            .unwrap();

        assert_eq!(location, "genmedia/flux1/a.png");
        let (mime, bytes) = store.get("flux1/a.png").await.unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, b"\x89PNG fake");
    }

    #[tokio::test]
    async fn test_store_contents_raw() {
        let store = InMemoryObjectStore::new("genmedia");
        store_contents(&store, "notes", "a.txt", "text/plain", "hello", false)
            .await
            .unwrap();
        assert_eq!(store.get("notes/a.txt").await.unwrap().1, b"hello");
        assert!(store.exists("notes/a.txt").await.unwrap());
        assert!(!store.exists("notes/b.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_base64_is_rejected() {
        let store = InMemoryObjectStore::new("genmedia");
        let result = store_contents(&store, "f", "a.png", "image/png", "not base64!!", true).await;
        assert!(matches!(result, Err(AppError::InvalidFormat { .. })));
        assert_eq!(store.len().await, 0);
    }

    #[test]
    fn test_public_url() {
        let prefix = "https://storage.mtls.cloud.google.com/";
        assert_eq!(
            public_url("gs://genmedia/imagen_live/1.png", prefix),
            "https://storage.mtls.cloud.google.com/genmedia/imagen_live/1.png"
        );
        assert_eq!(
            public_url("genmedia/flux1/2.png", prefix),
            "https://storage.mtls.cloud.google.com/genmedia/flux1/2.png"
        );
        assert_eq!(public_url("https://example.com/x.png", prefix), "https://example.com/x.png");
    }

    #[test]
    fn test_object_path_and_uri() {
        assert_eq!(object_path("", "a.png"), "a.png");
        assert_eq!(object_path("/runs/2024/", "a.png"), "runs/2024/a.png");
        assert_eq!(gs_uri("b/a.png"), "gs://b/a.png");
        assert_eq!(gs_uri("gs://b/a.png"), "gs://b/a.png");
        assert_eq!(mime_type_for("x/Y.PNG"), "image/png");
        assert_eq!(mime_type_for("meta.json"), "application/json");
    }
}
