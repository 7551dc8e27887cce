//! Google Cloud access tokens for Vertex AI and Cloud Storage calls
//!
//! Provides:
//! - A static token taken from configuration (local development)
//! - Tokens from the GCE metadata server, cached until shortly before expiry

use crate::config::GcpConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Source of OAuth2 bearer tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A currently valid access token
    async fn access_token(&self) -> Result<String>;
}

/// Fixed token, never refreshed
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Token from the metadata server of the VM or Cloud Run instance
pub struct MetadataTokenProvider {
    client: reqwest::Client,
    url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl MetadataTokenProvider {
    pub fn new(metadata_host: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            url: format!(
                "http://{}/computeMetadata/v1/instance/service-accounts/default/token",
                metadata_host
            ),
            cached: Mutex::new(None),
        })
    }

    async fn fetch(&self) -> Result<MetadataToken> {
        let response = self
            .client
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| AppError::Auth {
                message: format!("Metadata server unreachable: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Auth {
                message: format!("Metadata server returned {}: {}", status, body),
            });
        }

        response.json().await.map_err(|e| AppError::Auth {
            message: format!("Invalid token response: {}", e),
        })
    }
}

#[async_trait]
impl TokenProvider for MetadataTokenProvider {
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if Instant::now() + EXPIRY_MARGIN < token.expires_at {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.fetch().await?;
        tracing::debug!(expires_in = fresh.expires_in, "Fetched access token");

        let token = fresh.access_token.clone();
        *cached = Some(CachedToken {
            token: fresh.access_token,
            expires_at: Instant::now() + Duration::from_secs(fresh.expires_in),
        });

        Ok(token)
    }
}

/// Create the token provider for the configured credentials
pub fn create_token_provider(config: &GcpConfig) -> Result<Arc<dyn TokenProvider>> {
    match config.access_token.as_deref() {
        Some(token) if !token.is_empty() => {
            tracing::info!("Using static access token");
            Ok(Arc::new(StaticTokenProvider::new(token)))
        }
        _ => {
            tracing::info!(host = %config.metadata_host, "Using metadata server credentials");
            Ok(Arc::new(MetadataTokenProvider::new(&config.metadata_host)?))
        }
    }
}
