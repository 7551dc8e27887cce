//! Cloud Storage over the JSON API

use super::ObjectStore;
use crate::auth::TokenProvider;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;

pub struct GcsObjectStore {
    client: reqwest::Client,
    api_base: String,
    bucket: String,
    tokens: Arc<dyn TokenProvider>,
}

impl GcsObjectStore {
    pub fn new(api_base: &str, bucket: &str, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            tokens,
        })
    }

    fn object_url(&self, object_name: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/storage/v1/b", self.api_base)).map_err(|e| {
            AppError::Configuration {
                message: format!("Invalid storage API base: {}", e),
            }
        })?;

        url.path_segments_mut()
            .map_err(|_| AppError::Configuration {
                message: "Storage API base cannot carry a path".to_string(),
            })?
            .push(&self.bucket)
            .push("o")
            .push(object_name);

        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, object_name: &str, mime_type: &str, bytes: Vec<u8>) -> Result<()> {
        let url = format!("{}/upload/storage/v1/b/{}/o", self.api_base, self.bucket);
        let token = self.tokens.access_token().await?;
        let size = bytes.len();

        let response = self
            .client
            .post(&url)
            .query(&[("uploadType", "media"), ("name", object_name)])
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| AppError::Storage {
                message: format!("Upload of {} failed: {}", object_name, e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Storage {
                message: format!("Upload of {} returned {}: {}", object_name, status, body),
            });
        }

        tracing::debug!(bucket = %self.bucket, object = object_name, bytes = size, "Object uploaded");
        Ok(())
    }

    async fn exists(&self, object_name: &str) -> Result<bool> {
        let url = self.object_url(object_name)?;
        let token = self.tokens.access_token().await?;

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::Storage {
                message: format!("Lookup of {} failed: {}", object_name, e),
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(AppError::Storage {
                message: format!("Lookup of {} returned {}", object_name, status),
            }),
        }
    }
}
