//! Image model backends
//!
//! Provides a unified interface for the models compared in the arena:
//! - Imagen publisher models (Vertex AI `:predict`)
//! - Gemini image output (`:generateContent`)
//! - Model Garden endpoints (Flux.1, Stable Diffusion)
//! - A mock generator for local development and tests

mod gemini;
mod imagen;
mod model_garden;
mod vertex;

pub use gemini::{GeminiImageGenerator, GeminiTextGenerator, WELCOME_FALLBACK, WELCOME_PROMPT};
pub use imagen::ImagenGenerator;
pub use model_garden::EndpointImageGenerator;
pub use vertex::{RetryPolicy, VertexClient};

use crate::auth::TokenProvider;
use crate::config::AppConfig;
use crate::db::models::ImageMetadata;
use crate::db::ArenaStore;
use crate::errors::{AppError, Result};
use crate::storage::{gs_uri, store_contents, ObjectStore};
use async_trait::async_trait;
use sea_orm::{error::ConnAcquireErr, DbErr};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Arena label of the Gemini image backend
pub const GEMINI_LABEL: &str = "gemini2";

/// One stored image produced by a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Arena label of the model
    pub model: String,

    /// `gs://bucket/path`
    pub uri: String,
}

/// Trait for text-to-image models
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Label the model is compared under
    fn model_name(&self) -> &str;

    /// Generate, store and record images for `prompt`
    async fn generate(&self, prompt: &str, aspect_ratio: &str) -> Result<Vec<GeneratedImage>>;
}

/// Trait for short text completions
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generated text; falls back to a fixed message when the model is unavailable
    async fn generate_text(&self, prompt: &str) -> String;
}

/// Where generated images end up: blob storage plus a metadata record
#[derive(Clone)]
pub struct ImageSink {
    objects: Arc<dyn ObjectStore>,
    store: Arc<dyn ArenaStore>,
}

impl ImageSink {
    pub fn new(objects: Arc<dyn ObjectStore>, store: Arc<dyn ArenaStore>) -> Self {
        Self { objects, store }
    }

    pub fn bucket(&self) -> &str {
        self.objects.bucket()
    }

    /// Upload base64 image data as `folder/{uuid}.{ext}` and record it
    pub async fn save_base64(
        &self,
        model: &str,
        prompt: &str,
        folder: &str,
        mime_type: &str,
        data: &str,
    ) -> Result<GeneratedImage> {
        let file_name = format!("{}.{}", Uuid::new_v4(), extension_for(mime_type));
        let location =
            store_contents(self.objects.as_ref(), folder, &file_name, mime_type, data, true).await?;

        Ok(self.record(model, prompt, gs_uri(&location)).await)
    }

    /// Upload raw bytes as `folder/{uuid}.{ext}` and record it
    pub async fn save_bytes(
        &self,
        model: &str,
        prompt: &str,
        folder: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<GeneratedImage> {
        let file_name = format!("{}.{}", Uuid::new_v4(), extension_for(mime_type));
        let location = self.objects.upload(folder, &file_name, mime_type, bytes).await?;

        Ok(self.record(model, prompt, gs_uri(&location)).await)
    }

    /// Record metadata for an image already in storage
    pub async fn record(&self, model: &str, prompt: &str, uri: String) -> GeneratedImage {
        record_metadata(self.store.as_ref(), &uri, prompt, model).await;
        GeneratedImage {
            model: model.to_string(),
            uri,
        }
    }
}

/// Write the metadata record of a stored image; failures are logged only
pub async fn record_metadata(store: &dyn ArenaStore, uri: &str, prompt: &str, model: &str) {
    match store.add_image_metadata(&ImageMetadata::new(uri, prompt, model)).await {
        Ok(id) => tracing::debug!(id = %id, uri = uri, "Image metadata recorded"),
        Err(e) if is_timeout(&e) => {
            tracing::error!(uri = uri, model = model, error = %e, "Metadata write timed out")
        }
        Err(e) => tracing::error!(uri = uri, model = model, error = %e, "Error adding image metadata"),
    }
}

fn is_timeout(err: &AppError) -> bool {
    match err {
        AppError::HttpClient(e) => e.is_timeout(),
        AppError::Database(DbErr::ConnectionAcquire(ConnAcquireErr::Timeout)) => true,
        _ => false,
    }
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    }
}

/// Deterministic stand-in for a real model
pub struct MockImageGenerator {
    label: String,
    sink: ImageSink,
    fail: bool,
}

impl MockImageGenerator {
    pub fn new(label: impl Into<String>, sink: ImageSink) -> Self {
        Self {
            label: label.into(),
            sink,
            fail: false,
        }
    }

    /// Generator whose every call fails
    pub fn failing(label: impl Into<String>, sink: ImageSink) -> Self {
        Self {
            fail: true,
            ..Self::new(label, sink)
        }
    }
}

/// Smallest valid PNG: one transparent pixel
const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

#[async_trait]
impl ImageGenerator for MockImageGenerator {
    fn model_name(&self) -> &str {
        &self.label
    }

    async fn generate(&self, prompt: &str, _aspect_ratio: &str) -> Result<Vec<GeneratedImage>> {
        if self.fail {
            return Err(AppError::Generation {
                model: self.label.clone(),
                message: "mock failure".to_string(),
            });
        }

        let folder = format!("mock/{}", self.label.replace('/', "_"));
        let image = self
            .sink
            .save_bytes(&self.label, prompt, &folder, "image/png", PLACEHOLDER_PNG.to_vec())
            .await?;
        Ok(vec![image])
    }
}

/// Text generator returning a fixed message
pub struct MockTextGenerator;

#[async_trait]
impl TextGenerator for MockTextGenerator {
    async fn generate_text(&self, _prompt: &str) -> String {
        WELCOME_FALLBACK.to_string()
    }
}

/// Image models by arena label, plus the text model
#[derive(Clone)]
pub struct ModelRegistry {
    generators: BTreeMap<String, Arc<dyn ImageGenerator>>,
    text: Arc<dyn TextGenerator>,
}

impl ModelRegistry {
    pub fn new(text: Arc<dyn TextGenerator>) -> Self {
        Self {
            generators: BTreeMap::new(),
            text,
        }
    }

    /// Add a generator, replacing any with the same label
    pub fn register(&mut self, generator: Arc<dyn ImageGenerator>) {
        self.generators
            .insert(generator.model_name().to_string(), generator);
    }

    pub fn get(&self, model: &str) -> Option<Arc<dyn ImageGenerator>> {
        self.generators.get(model).cloned()
    }

    /// Registered labels in name order
    pub fn names(&self) -> Vec<String> {
        self.generators.keys().cloned().collect()
    }

    /// Generators for `models`, rejecting unknown labels
    pub fn resolve(&self, models: &[String]) -> Result<Vec<Arc<dyn ImageGenerator>>> {
        models
            .iter()
            .map(|m| {
                self.get(m)
                    .ok_or_else(|| AppError::UnknownModel { model: m.clone() })
            })
            .collect()
    }

    pub fn text(&self) -> Arc<dyn TextGenerator> {
        self.text.clone()
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}

/// Create the model registry based on configuration
pub fn create_registry(
    config: &AppConfig,
    sink: ImageSink,
    tokens: Arc<dyn TokenProvider>,
) -> Result<ModelRegistry> {
    let models = &config.models;
    let imagen_models = [
        &models.imagen2,
        &models.imagen3_fast,
        &models.imagen3,
        &models.imagen32,
    ];

    let registry = match config.generation.provider.as_str() {
        "vertex" => {
            let client = Arc::new(VertexClient::new(config, tokens)?);
            let mut registry = ModelRegistry::new(Arc::new(GeminiTextGenerator::new(
                client.clone(),
                &models.text,
            )));

            for model in imagen_models {
                registry.register(Arc::new(ImagenGenerator::new(
                    client.clone(),
                    sink.clone(),
                    model,
                    &config.generation.aspect_ratio,
                )));
            }

            registry.register(Arc::new(GeminiImageGenerator::new(
                client.clone(),
                sink.clone(),
                &models.gemini,
            )));

            match models.flux1_endpoint_id.as_deref() {
                Some(endpoint) if !endpoint.is_empty() => {
                    registry.register(Arc::new(EndpointImageGenerator::flux(
                        client.clone(),
                        sink.clone(),
                        &models.flux1,
                        endpoint,
                    )));
                }
                _ => tracing::warn!("MODEL_FLUX1_ENDPOINT_ID is not set, flux1 is not available"),
            }

            if let Some(endpoint) = models
                .stable_diffusion_endpoint_id
                .as_deref()
                .filter(|e| !e.is_empty())
            {
                registry.register(Arc::new(EndpointImageGenerator::stable_diffusion(
                    client,
                    sink,
                    &models.stable_diffusion,
                    endpoint,
                )));
            }

            registry
        }
        "mock" => {
            let mut registry = ModelRegistry::new(Arc::new(MockTextGenerator));
            for model in imagen_models {
                registry.register(Arc::new(MockImageGenerator::new(model.clone(), sink.clone())));
            }
            registry.register(Arc::new(MockImageGenerator::new(GEMINI_LABEL, sink)));
            registry
        }
        other => {
            return Err(AppError::Configuration {
                message: format!("Unknown generation provider `{}`", other),
            })
        }
    };

    tracing::info!(
        provider = %config.generation.provider,
        models = ?registry.names(),
        "Model registry ready"
    );

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use crate::db::InMemoryStore;
    use crate::storage::InMemoryObjectStore;

    #[test]
    fn test_pool_timeout_is_a_timeout() {
        let err = AppError::Database(DbErr::ConnectionAcquire(ConnAcquireErr::Timeout));
        assert!(is_timeout(&err));

        let closed = AppError::Database(DbErr::ConnectionAcquire(ConnAcquireErr::ConnectionClosed));
        assert!(!is_timeout(&closed));
    }

    #[test]
    fn test_timeout_wording_is_not_a_timeout() {
        let err = AppError::Internal {
            message: "prompt mentions a timeout".to_string(),
        };
        assert!(!is_timeout(&err));
    }

    #[tokio::test]
    async fn test_http_timeout_is_a_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept connections and never answer
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(50))
            .build()
            .unwrap();
        let err = client
            .get(format!("http://{}/", addr))
            .send()
            .await
            .err()
            .unwrap();
        assert!(is_timeout(&AppError::HttpClient(err)));

        let refused = client.get("http://127.0.0.1:9/").send().await.err().unwrap();
        assert!(!is_timeout(&AppError::HttpClient(refused)));
    }

    fn sink_with(store: Arc<InMemoryStore>) -> (ImageSink, Arc<InMemoryObjectStore>) {
        let objects = Arc::new(InMemoryObjectStore::new("arena-local"));
        (ImageSink::new(objects.clone(), store), objects)
    }

    #[tokio::test]
    async fn test_mock_generator_stores_and_records() {
        let store = Arc::new(InMemoryStore::new());
        let (sink, objects) = sink_with(store.clone());

        let images = MockImageGenerator::new("imagen-3.0-generate-002", sink)
            .generate("a lighthouse at dawn", "1:1")
            .await
            .unwrap();

        assert_eq!(images.len(), 1);
        assert!(images[0].uri.starts_with("gs://arena-local/mock/"));
        assert_eq!(objects.len().await, 1);

        let recorded = store
            .find_images("a lighthouse at dawn", "imagen-3.0-generate-002")
            .await
            .unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].gcsuri, images[0].uri);
    }

    #[tokio::test]
    async fn test_metadata_failure_is_swallowed() {
        let store = Arc::new(InMemoryStore::new().with_failing_image_writes());
        let (sink, objects) = sink_with(store.clone());

        let images = MockImageGenerator::new("gemini2", sink)
            .generate("a red fox", "1:1")
            .await
            .unwrap();

        assert_eq!(images.len(), 1);
        assert_eq!(objects.len().await, 1);
        assert_eq!(store.image_count().await, 0);
    }

    #[test]
    fn test_mock_registry_and_resolve() {
        let (sink, _) = sink_with(Arc::new(InMemoryStore::new()));
        let config = AppConfig::in_memory();
        let registry =
            create_registry(&config, sink, Arc::new(StaticTokenProvider::new("t"))).unwrap();

        assert_eq!(registry.len(), 5);
        assert!(registry.get(GEMINI_LABEL).is_some());
        assert!(registry.resolve(&["gemini2".to_string()]).is_ok());

        let err = registry
            .resolve(&["dall-e".to_string()])
            .err()
            .unwrap();
        assert!(matches!(err, AppError::UnknownModel { .. }));
    }

    #[test]
    fn test_vertex_registry_skips_flux_without_endpoint() {
        let (sink, _) = sink_with(Arc::new(InMemoryStore::new()));
        let mut config = AppConfig::in_memory();
        config.generation.provider = "vertex".to_string();
        config.gcp.project_id = Some("demo".to_string());

        let tokens: Arc<dyn TokenProvider> = Arc::new(StaticTokenProvider::new("t"));
        let registry = create_registry(&config, sink.clone(), tokens.clone()).unwrap();
        assert!(registry.get(&config.models.flux1).is_none());
        assert!(registry.get(GEMINI_LABEL).is_some());

        config.models.flux1_endpoint_id = Some("42".to_string());
        let registry = create_registry(&config, sink, tokens).unwrap();
        assert!(registry.get(&config.models.flux1).is_some());
    }
}
