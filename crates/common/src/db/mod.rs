//! Document persistence for GenMedia Arena
//!
//! Provides:
//! - The `ArenaStore` interface over the images, ratings and studies collections
//! - A Postgres implementation storing JSONB documents (SeaORM)
//! - An in-memory implementation for development and tests
//! - Connection pool management

mod memory;
pub mod models;
mod repository;

pub use memory::InMemoryStore;
pub use repository::Repository;

use crate::config::{AppConfig, DatabaseConfig};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use models::{EloRatingRecord, ImageMetadata, Study, VoteRecord};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Persistence operations used by the arena
///
/// Writes are independent: there is no transaction spanning a rating update
/// and the vote written after it.
#[async_trait]
pub trait ArenaStore: Send + Sync {
    /// Check connectivity
    async fn ping(&self) -> Result<()>;

    /// Create the collections if they do not exist
    async fn ensure_schema(&self) -> Result<()>;

    /// Store metadata for a newly stored image
    async fn add_image_metadata(&self, image: &ImageMetadata) -> Result<Uuid>;

    /// Images generated by `model` for exactly `prompt`, newest first
    async fn find_images(&self, prompt: &str, model: &str) -> Result<Vec<ImageMetadata>>;

    /// Current ratings of a study, `None` before its first vote
    async fn latest_ratings(&self, study: &str) -> Result<Option<EloRatingRecord>>;

    /// Replace the rating document of `record.study`
    async fn save_ratings(&self, record: &EloRatingRecord) -> Result<()>;

    /// Append a vote to the audit log
    async fn append_vote(&self, vote: &VoteRecord) -> Result<Uuid>;

    /// At most `limit` votes of a study, newest first
    async fn latest_votes(&self, study: &str, limit: u64) -> Result<Vec<VoteRecord>>;

    /// Stored study definitions, newest first
    async fn list_studies(&self) -> Result<Vec<Study>>;

    /// Store a study definition
    async fn add_study(&self, study: &Study) -> Result<Uuid>;
}

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    pub primary: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let url = config.url.as_deref().ok_or_else(|| AppError::Configuration {
            message: "DATABASE_URL is required for the postgres backend".to_string(),
        })?;

        info!("Connecting to database...");

        let mut opts = ConnectOptions::new(url);
        opts
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let primary = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e)
            })?;

        info!("Database connection established");

        Ok(Self { primary })
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        use sea_orm::ConnectionTrait;

        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Ping failed: {}", e),
            })?;

        Ok(())
    }
}

/// Create the store selected by `database.backend`
pub async fn create_store(config: &AppConfig) -> Result<Arc<dyn ArenaStore>> {
    match config.database.backend.as_str() {
        "postgres" => {
            let pool = DbPool::new(&config.database).await?;
            Ok(Arc::new(Repository::new(pool, config.collections.clone())))
        }
        "memory" => {
            tracing::warn!("Using in-memory store, data is lost on shutdown");
            Ok(Arc::new(InMemoryStore::new()))
        }
        other => Err(AppError::Configuration {
            message: format!("Unknown database backend `{}`", other),
        }),
    }
}
