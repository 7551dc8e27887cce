//! Configuration management for GenMedia Arena services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - The flat variables used by earlier deployments (PROJECT_ID, GENMEDIA_BUCKET, ...)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml)
//! - Default values
//!
//! `AppConfig::validate` is called once at startup and fails fast on missing
//! required values.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Document store configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Google Cloud project settings
    #[serde(default)]
    pub gcp: GcpConfig,

    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Collection (table) names
    #[serde(default)]
    pub collections: CollectionsConfig,

    /// Image model identifiers
    #[serde(default)]
    pub models: ModelsConfig,

    /// Model backend client settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Arena behaviour
    #[serde(default)]
    pub arena: ArenaConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Store backend: postgres, memory
    #[serde(default = "default_database_backend")]
    pub backend: String,

    /// Postgres URL (required for the postgres backend)
    pub url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GcpConfig {
    /// Google Cloud project ID
    pub project_id: Option<String>,

    /// Vertex AI location
    #[serde(default = "default_location")]
    pub location: String,

    /// Static access token; the metadata server is used when absent
    pub access_token: Option<String>,

    /// Metadata server host for access tokens
    #[serde(default = "default_metadata_host")]
    pub metadata_host: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Storage provider: gcs, memory
    #[serde(default = "default_storage_provider")]
    pub provider: String,

    /// Bucket for uploaded arena images
    pub bucket: Option<String>,

    /// Bucket for pre-generated study images
    pub generated_bucket: Option<String>,

    /// Prefix substituted for `gs://` when rendering public URLs
    #[serde(default = "default_public_url_prefix")]
    pub public_url_prefix: String,

    /// Cloud Storage JSON API base URL
    #[serde(default = "default_storage_api_base")]
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectionsConfig {
    /// Image metadata collection
    #[serde(default = "default_images_collection")]
    pub images: String,

    /// ELO ratings and vote log collection
    #[serde(default = "default_ratings_collection")]
    pub ratings: String,

    /// Study definitions collection
    #[serde(default = "default_studies_collection")]
    pub studies: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelsConfig {
    #[serde(default = "default_imagen2")]
    pub imagen2: String,

    #[serde(default = "default_imagen3_fast")]
    pub imagen3_fast: String,

    #[serde(default = "default_imagen3")]
    pub imagen3: String,

    #[serde(default = "default_imagen32")]
    pub imagen32: String,

    /// Gemini model used for image output
    #[serde(default = "default_gemini")]
    pub gemini: String,

    /// Gemini model used for text (welcome message)
    #[serde(default = "default_gemini")]
    pub text: String,

    #[serde(default = "default_flux1")]
    pub flux1: String,

    /// Vertex AI endpoint hosting Flux.1; Flux is disabled when unset
    pub flux1_endpoint_id: Option<String>,

    #[serde(default = "default_stable_diffusion")]
    pub stable_diffusion: String,

    /// Vertex AI endpoint hosting Stable Diffusion; disabled when unset
    pub stable_diffusion_endpoint_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Generation provider: vertex, mock
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    /// Vertex AI API base URL (derived from the location when unset)
    pub api_base: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    /// Maximum attempts per call
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,

    /// Initial backoff in milliseconds, doubled per attempt
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Aspect ratio used when a request does not name one
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArenaConfig {
    /// ELO K-factor
    #[serde(default = "default_k_factor")]
    pub elo_k_factor: f64,

    /// Study used when a request does not name one
    #[serde(default = "default_study")]
    pub default_study: String,

    /// Prompt file for the live study
    #[serde(default = "default_prompts_path")]
    pub prompts_path: String,

    /// Worker pool size for multi-model dispatch
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,

    /// Default number of votes returned by history queries
    #[serde(default = "default_history_limit")]
    pub history_limit: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 180 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_database_backend() -> String { "postgres".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_location() -> String { "us-central1".to_string() }
fn default_metadata_host() -> String { "metadata.google.internal".to_string() }
fn default_storage_provider() -> String { "gcs".to_string() }
fn default_public_url_prefix() -> String { "https://storage.mtls.cloud.google.com/".to_string() }
fn default_storage_api_base() -> String { "https://storage.googleapis.com".to_string() }
fn default_images_collection() -> String { "arena_images".to_string() }
fn default_ratings_collection() -> String { "arena_elo".to_string() }
fn default_studies_collection() -> String { "arena_studies".to_string() }
fn default_imagen2() -> String { "imagegeneration@006".to_string() }
fn default_imagen3_fast() -> String { "imagen-3.0-fast-generate-001".to_string() }
fn default_imagen3() -> String { "imagen-3.0-generate-001".to_string() }
fn default_imagen32() -> String { "imagen-3.0-generate-002".to_string() }
fn default_gemini() -> String { "gemini-2.0-flash".to_string() }
fn default_flux1() -> String { "black-forest-labs/FLUX.1-schnell".to_string() }
fn default_stable_diffusion() -> String { "stabilityai/stable-diffusion-xl-base-1.0".to_string() }
fn default_generation_provider() -> String { "vertex".to_string() }
fn default_generation_timeout() -> u64 { 120 }
fn default_generation_retries() -> u32 { 3 }
fn default_backoff_base() -> u64 { 1000 }
fn default_aspect_ratio() -> String { "1:1".to_string() }
fn default_k_factor() -> f64 { 32.0 }
fn default_study() -> String { crate::LIVE_STUDY.to_string() }
fn default_prompts_path() -> String { "prompts/imagen_prompts.json".to_string() }
fn default_dispatch_workers() -> usize { 4 }
fn default_history_limit() -> u64 { 10 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "genmedia-arena".to_string() }

/// Largest accepted retry base delay
const MAX_BACKOFF_BASE_MS: u64 = 60_000;

/// Locations known to host every model the arena uses
const KNOWN_LOCATIONS: &[&str] = &["us-central1", "us-east4", "europe-west4", "asia-east1"];

/// Flat variables from earlier deployments and the keys they override
const LEGACY_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("PROJECT_ID", "gcp.project_id"),
    ("LOCATION", "gcp.location"),
    ("GENMEDIA_BUCKET", "storage.bucket"),
    ("GENMEDIA_GENERATED_BUCKET", "storage.generated_bucket"),
    ("IMAGE_COLLECTION_NAME", "collections.images"),
    ("IMAGE_RATINGS_COLLECTION_NAME", "collections.ratings"),
    ("STUDY_COLLECTION_NAME", "collections.studies"),
    ("MODEL_FLUX1_ENDPOINT_ID", "models.flux1_endpoint_id"),
    ("MODEL_STABLE_DIFFUSION_ENDPOINT_ID", "models.stable_diffusion_endpoint_id"),
    ("MODEL_ID", "models.text"),
    ("ELO_K_FACTOR", "arena.elo_k_factor"),
    ("DATABASE_URL", "database.url"),
];

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let mut builder = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__ARENA__ELO_K_FACTOR=24
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
            );

        for (var, key) in LEGACY_ENV_OVERRIDES {
            let value = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
            builder = builder.set_override_option(*key, value)?;
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check required values; called at startup so misconfiguration fails fast
    pub fn validate(&self) -> Result<(), ConfigError> {
        let uses_gcp = self.storage.provider == "gcs" || self.generation.provider == "vertex";

        if uses_gcp && is_blank(&self.gcp.project_id) {
            return Err(missing("PROJECT_ID"));
        }

        if self.storage.provider == "gcs" {
            if is_blank(&self.storage.bucket) {
                return Err(missing("GENMEDIA_BUCKET"));
            }
            if is_blank(&self.storage.generated_bucket) {
                return Err(missing("GENMEDIA_GENERATED_BUCKET"));
            }
        }

        if self.database.backend == "postgres" && is_blank(&self.database.url) {
            return Err(missing("DATABASE_URL"));
        }

        if !(self.arena.elo_k_factor > 0.0) {
            return Err(ConfigError::Message(
                "ELO_K_FACTOR must be a positive number.".to_string(),
            ));
        }

        if self.generation.backoff_base_ms > MAX_BACKOFF_BASE_MS {
            return Err(ConfigError::Message(format!(
                "generation.backoff_base_ms must be at most {}.",
                MAX_BACKOFF_BASE_MS
            )));
        }

        if self.arena.dispatch_workers == 0 {
            return Err(ConfigError::Message(
                "arena.dispatch_workers must be at least 1.".to_string(),
            ));
        }

        for name in [
            &self.collections.images,
            &self.collections.ratings,
            &self.collections.studies,
        ] {
            if !is_valid_collection_name(name) {
                return Err(ConfigError::Message(format!(
                    "Collection name `{}` is not a valid identifier.",
                    name
                )));
            }
        }

        if self.generation.provider == "vertex" && self.models.flux1_endpoint_id.is_none() {
            tracing::warn!("MODEL_FLUX1_ENDPOINT_ID is not set, the model list will exclude flux1");
        }

        if !KNOWN_LOCATIONS.contains(&self.gcp.location.as_str()) {
            tracing::warn!(location = %self.gcp.location, "Location may not host every arena model");
        }

        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Vertex AI base URL for the configured location
    pub fn vertex_api_base(&self) -> String {
        self.generation
            .api_base
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com/v1", self.gcp.location))
    }

    /// Project ID, empty when unset (only reachable with mock providers)
    pub fn project_id(&self) -> &str {
        self.gcp.project_id.as_deref().unwrap_or_default()
    }

    /// Configuration suitable for local development and tests: in-memory
    /// store, in-memory object storage and mock generators
    pub fn in_memory() -> Self {
        let mut config = Self::default();
        config.database.backend = "memory".to_string();
        config.storage.provider = "memory".to_string();
        config.storage.bucket = Some("arena-local".to_string());
        config.generation.provider = "mock".to_string();
        config.observability.metrics_port = 0;
        config
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn missing(var: &str) -> ConfigError {
    ConfigError::Message(format!("{} environment variable is not set.", var))
}

/// Collection names end up in SQL statements, so only plain identifiers are accepted
pub fn is_valid_collection_name(name: &str) -> bool {
    let re = regex_lite::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("static regex");
    re.is_match(name)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_database_backend(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            location: default_location(),
            access_token: None,
            metadata_host: default_metadata_host(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: default_storage_provider(),
            bucket: None,
            generated_bucket: None,
            public_url_prefix: default_public_url_prefix(),
            api_base: default_storage_api_base(),
        }
    }
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            images: default_images_collection(),
            ratings: default_ratings_collection(),
            studies: default_studies_collection(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            imagen2: default_imagen2(),
            imagen3_fast: default_imagen3_fast(),
            imagen3: default_imagen3(),
            imagen32: default_imagen32(),
            gemini: default_gemini(),
            text: default_gemini(),
            flux1: default_flux1(),
            flux1_endpoint_id: None,
            stable_diffusion: default_stable_diffusion(),
            stable_diffusion_endpoint_id: None,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            api_base: None,
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
            backoff_base_ms: default_backoff_base(),
            aspect_ratio: default_aspect_ratio(),
        }
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            elo_k_factor: default_k_factor(),
            default_study: default_study(),
            prompts_path: default_prompts_path(),
            dispatch_workers: default_dispatch_workers(),
            history_limit: default_history_limit(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gcp_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.gcp.project_id = Some("arena-project".into());
        config.storage.bucket = Some("arena-images".into());
        config.storage.generated_bucket = Some("arena-generated".into());
        config.database.url = Some("postgres://localhost/arena".into());
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.arena.elo_k_factor, 32.0);
        assert_eq!(config.collections.images, "arena_images");
        assert_eq!(config.collections.ratings, "arena_elo");
        assert_eq!(config.models.imagen3_fast, "imagen-3.0-fast-generate-001");
    }

    #[test]
    fn test_complete_gcp_config_validates() {
        assert!(gcp_config().validate().is_ok());
    }

    #[test]
    fn test_missing_project_fails_fast() {
        let mut config = gcp_config();
        config.gcp.project_id = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("PROJECT_ID"));
    }

    #[test]
    fn test_missing_generated_bucket_fails_fast() {
        let mut config = gcp_config();
        config.storage.generated_bucket = Some("  ".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("GENMEDIA_GENERATED_BUCKET"));
    }

    #[test]
    fn test_non_positive_k_factor_rejected() {
        let mut config = gcp_config();
        config.arena.elo_k_factor = 0.0;
        assert!(config.validate().is_err());

        config.arena.elo_k_factor = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_backoff_rejected() {
        let mut config = gcp_config();
        config.generation.backoff_base_ms = MAX_BACKOFF_BASE_MS + 1;
        assert!(config.validate().is_err());

        config.generation.backoff_base_ms = MAX_BACKOFF_BASE_MS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_collection_names_must_be_identifiers() {
        let mut config = gcp_config();
        config.collections.ratings = "arena_elo; DROP TABLE x".into();
        assert!(config.validate().is_err());

        assert!(is_valid_collection_name("arena_images"));
        assert!(!is_valid_collection_name("1images"));
        assert!(!is_valid_collection_name(""));
    }

    #[test]
    fn test_in_memory_config_needs_no_cloud_settings() {
        assert!(AppConfig::in_memory().validate().is_ok());
    }

    #[test]
    fn test_vertex_api_base_follows_location() {
        let mut config = gcp_config();
        config.gcp.location = "europe-west4".into();
        assert_eq!(
            config.vertex_api_base(),
            "https://europe-west4-aiplatform.googleapis.com/v1"
        );
    }
}
