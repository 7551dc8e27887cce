//! Vertex AI REST client shared by the model backends
//!
//! Every call goes through `post_json`, which retries rate limiting, server
//! errors and transport failures with exponential backoff plus jitter.

use crate::auth::TokenProvider;
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use rand::Rng;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest wait between two attempts, before jitter
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1) * (1 + jitter)`
    pub fn delay(&self, retry: u32) -> Duration {
        let backoff = self
            .base_delay
            .checked_mul(2_u32.saturating_pow(retry.saturating_sub(1)))
            .map_or(MAX_RETRY_DELAY, |d| d.min(MAX_RETRY_DELAY));
        let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
        backoff.mul_f64(1.0 + jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

enum Failure {
    Retryable { rate_limited: bool, message: String },
    Fatal(AppError),
}

pub struct VertexClient {
    client: reqwest::Client,
    api_base: String,
    project_id: String,
    location: String,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
}

impl VertexClient {
    pub fn new(config: &AppConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.generation.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.vertex_api_base().trim_end_matches('/').to_string(),
            project_id: config.project_id().to_string(),
            location: config.gcp.location.clone(),
            tokens,
            retry: RetryPolicy {
                max_attempts: config.generation.max_retries.max(1),
                base_delay: Duration::from_millis(config.generation.backoff_base_ms),
            },
        })
    }

    /// URL of a Google publisher model method, e.g. `:predict`
    pub fn publisher_model_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/projects/{}/locations/{}/publishers/google/models/{}:{}",
            self.api_base, self.project_id, self.location, model, method
        )
    }

    /// URL of a method on a deployed Model Garden endpoint
    pub fn endpoint_url(&self, endpoint_id: &str, method: &str) -> String {
        format!(
            "{}/projects/{}/locations/{}/endpoints/{}:{}",
            self.api_base, self.project_id, self.location, endpoint_id, method
        )
    }

    /// POST a JSON body on behalf of `model`, retrying transient failures
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        model: &str,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let start = Instant::now();
        let mut last_rate_limited = false;
        let mut last_message = String::new();

        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay(attempt - 1);
                tracing::warn!(
                    model = model,
                    attempt = attempt,
                    max_attempts = self.retry.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_message,
                    "Retrying generation request"
                );
                tokio::time::sleep(delay).await;
            }

            match self.attempt(model, url, body).await {
                Ok(value) => {
                    metrics::record_generation(model, start.elapsed().as_secs_f64(), true);
                    return Ok(value);
                }
                Err(Failure::Retryable { rate_limited, message }) => {
                    last_rate_limited = rate_limited;
                    last_message = message;
                }
                Err(Failure::Fatal(e)) => {
                    metrics::record_generation(model, start.elapsed().as_secs_f64(), false);
                    return Err(e);
                }
            }
        }

        metrics::record_generation(model, start.elapsed().as_secs_f64(), false);

        if last_rate_limited {
            Err(AppError::GenerationRateLimited {
                model: model.to_string(),
                attempts: self.retry.max_attempts,
            })
        } else {
            Err(AppError::Generation {
                model: model.to_string(),
                message: format!(
                    "giving up after {} attempts: {}",
                    self.retry.max_attempts, last_message
                ),
            })
        }
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        model: &str,
        url: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<T, Failure> {
        let token = self.tokens.access_token().await.map_err(Failure::Fatal)?;

        let response = match self.client.post(url).bearer_auth(token).json(body).send().await {
            Ok(response) => response,
            Err(e) => {
                return Err(Failure::Retryable {
                    rate_limited: false,
                    message: format!("request failed: {}", e),
                })
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("API error {}: {}", status, truncate(&text, 512));

            return Err(if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                Failure::Retryable {
                    rate_limited: status == StatusCode::TOO_MANY_REQUESTS,
                    message,
                }
            } else {
                Failure::Fatal(AppError::Generation {
                    model: model.to_string(),
                    message,
                })
            });
        }

        response.json::<T>().await.map_err(|e| {
            Failure::Fatal(AppError::Generation {
                model: model.to_string(),
                message: format!("Failed to parse response: {}", e),
            })
        })
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;

    #[test]
    fn test_backoff_doubles_with_bounded_jitter() {
        let policy = RetryPolicy::default();
        for retry in 1..=3u32 {
            let base = Duration::from_secs(1) * 2_u32.pow(retry - 1);
            let delay = policy.delay(retry);
            assert!(delay >= base);
            assert!(delay < base * 2);
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 40,
            base_delay: Duration::from_millis(u64::MAX / 4),
        };
        for retry in [1, 2, 33, u32::MAX] {
            let delay = policy.delay(retry);
            assert!(delay >= MAX_RETRY_DELAY);
            assert!(delay < MAX_RETRY_DELAY * 2);
        }
    }

    #[test]
    fn test_urls() {
        let mut config = AppConfig::in_memory();
        config.gcp.project_id = Some("demo".to_string());

        let client = VertexClient::new(&config, Arc::new(StaticTokenProvider::new("t"))).unwrap();
        assert_eq!(
            client.publisher_model_url("imagen-3.0-generate-002", "predict"),
            "https://us-central1-aiplatform.googleapis.com/v1/projects/demo/locations/us-central1/publishers/google/models/imagen-3.0-generate-002:predict"
        );
        assert_eq!(
            client.endpoint_url("1234", "predict"),
            "https://us-central1-aiplatform.googleapis.com/v1/projects/demo/locations/us-central1/endpoints/1234:predict"
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[tokio::test]
    async fn test_unreachable_host_exhausts_retries() {
        let mut config = AppConfig::in_memory();
        config.gcp.project_id = Some("demo".to_string());
        config.generation.api_base = Some("http://127.0.0.1:9/v1".to_string());
        config.generation.backoff_base_ms = 1;
        config.generation.timeout_secs = 2;

        let client = VertexClient::new(&config, Arc::new(StaticTokenProvider::new("t"))).unwrap();
        let url = client.publisher_model_url("imagen-3.0-generate-002", "predict");
        let result: Result<serde_json::Value> = client
            .post_json("imagen-3.0-generate-002", &url, &serde_json::json!({}))
            .await;

        assert!(matches!(result, Err(AppError::Generation { .. })));
    }
}
