//! GenMedia Arena Common Library
//!
//! Shared code for the arena gateway and the admin CLI including:
//! - ELO rating arithmetic
//! - Concurrent multi-model dispatch
//! - Image model backends (Imagen, Gemini, Model Garden endpoints)
//! - Object storage and document persistence
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod arena;
pub mod auth;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod elo;
pub mod errors;
pub mod generation;
pub mod metrics;
pub mod prompts;
pub mod storage;

// Re-export commonly used types
pub use errors::{AppError, Result};
pub use config::AppConfig;
pub use db::ArenaStore;
pub use generation::ImageGenerator;
pub use storage::ObjectStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Study that generates images live with every configured model
pub const LIVE_STUDY: &str = "live";
