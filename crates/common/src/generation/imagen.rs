//! Imagen publisher models

use super::vertex::VertexClient;
use super::{GeneratedImage, ImageGenerator, ImageSink};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

/// Folder the service writes live arena images to
const OUTPUT_FOLDER: &str = "imagen_live";

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<ImagenPrediction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImagenPrediction {
    gcs_uri: Option<String>,
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
    rai_filtered_reason: Option<String>,
}

pub struct ImagenGenerator {
    client: Arc<VertexClient>,
    sink: ImageSink,
    model: String,
    default_aspect_ratio: String,
}

impl ImagenGenerator {
    pub fn new(client: Arc<VertexClient>, sink: ImageSink, model: &str, default_aspect_ratio: &str) -> Self {
        Self {
            client,
            sink,
            model: model.to_string(),
            default_aspect_ratio: default_aspect_ratio.to_string(),
        }
    }

    fn request_body(&self, prompt: &str, aspect_ratio: &str) -> serde_json::Value {
        let aspect_ratio = if aspect_ratio.is_empty() {
            &self.default_aspect_ratio
        } else {
            aspect_ratio
        };

        json!({
            "instances": [{ "prompt": prompt }],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": aspect_ratio,
                "addWatermark": true,
                "language": "auto",
                "safetySetting": "block_few",
                "storageUri": format!("gs://{}/{}", self.sink.bucket(), OUTPUT_FOLDER),
            }
        })
    }
}

#[async_trait]
impl ImageGenerator for ImagenGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, aspect_ratio: &str) -> Result<Vec<GeneratedImage>> {
        tracing::info!(model = %self.model, prompt = prompt, "Generating with Imagen");
        let start = Instant::now();

        let url = self.client.publisher_model_url(&self.model, "predict");
        let response: PredictResponse = self
            .client
            .post_json(&self.model, &url, &self.request_body(prompt, aspect_ratio))
            .await?;

        tracing::info!(
            model = %self.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            predictions = response.predictions.len(),
            "Imagen responded"
        );

        let mut images = Vec::with_capacity(response.predictions.len());
        for prediction in response.predictions {
            if let Some(uri) = prediction.gcs_uri {
                images.push(self.sink.record(&self.model, prompt, uri).await);
            } else if let Some(data) = prediction.bytes_base64_encoded {
                let mime = prediction.mime_type.as_deref().unwrap_or("image/png");
                images.push(
                    self.sink
                        .save_base64(&self.model, prompt, OUTPUT_FOLDER, mime, &data)
                        .await?,
                );
            } else if let Some(reason) = prediction.rai_filtered_reason {
                tracing::warn!(model = %self.model, reason = %reason, "Image filtered");
            }
        }

        if images.is_empty() {
            return Err(AppError::Generation {
                model: self.model.clone(),
                message: "no images returned".to_string(),
            });
        }

        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use crate::config::AppConfig;
    use crate::db::InMemoryStore;
    use crate::storage::InMemoryObjectStore;

    fn generator() -> ImagenGenerator {
        let mut config = AppConfig::in_memory();
        config.gcp.project_id = Some("demo".to_string());
        let client = Arc::new(
            VertexClient::new(&config, Arc::new(StaticTokenProvider::new("t"))).unwrap(),
        );
        let sink = ImageSink::new(
            Arc::new(InMemoryObjectStore::new("genmedia")),
            Arc::new(InMemoryStore::new()),
        );
        ImagenGenerator::new(client, sink, "imagen-3.0-generate-002", "1:1")
    }

    #[test]
    fn test_request_body() {
        let body = generator().request_body("a koi pond", "16:9");
        let params = &body["parameters"];
        assert_eq!(body["instances"][0]["prompt"], "a koi pond");
        assert_eq!(params["sampleCount"], 1);
        assert_eq!(params["aspectRatio"], "16:9");
        assert_eq!(params["addWatermark"], true);
        assert_eq!(params["language"], "auto");
        assert_eq!(params["safetySetting"], "block_few");
        assert_eq!(params["storageUri"], "gs://genmedia/imagen_live");
    }

    #[test]
    fn test_default_aspect_ratio() {
        let body = generator().request_body("a koi pond", "");
        assert_eq!(body["parameters"]["aspectRatio"], "1:1");
    }

    #[test]
    fn test_prediction_parsing() {
        let response: PredictResponse = serde_json::from_value(json!({
            "predictions": [
                { "gcsUri": "gs://genmedia/imagen_live/1/sample_0.png", "mimeType": "image/png" },
                { "bytesBase64Encoded": "iVBORw0KGgo=" },
                { "raiFilteredReason": "blocked" }
            ]
        }))
        .unwrap();

        assert_eq!(response.predictions.len(), 3);
        assert!(response.predictions[0].gcs_uri.is_some());
        assert!(response.predictions[1].bytes_base64_encoded.is_some());
        assert!(response.predictions[2].rai_filtered_reason.is_some());
    }
}
