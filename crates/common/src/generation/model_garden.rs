//! Models deployed to Vertex AI endpoints from Model Garden

use super::vertex::VertexClient;
use super::{GeneratedImage, ImageGenerator, ImageSink};
use crate::errors::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<serde_json::Value>,
}

/// Base64 image data of a prediction, under `output` or `bytesBase64Encoded`
fn image_data(prediction: &serde_json::Value) -> Option<&str> {
    prediction
        .get("output")
        .and_then(|v| v.as_str())
        .or_else(|| prediction.get("bytesBase64Encoded").and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
}

pub struct EndpointImageGenerator {
    client: Arc<VertexClient>,
    sink: ImageSink,
    model: String,
    endpoint_id: String,
    folder: String,
    parameters: serde_json::Value,
}

impl EndpointImageGenerator {
    pub fn new(
        client: Arc<VertexClient>,
        sink: ImageSink,
        model: &str,
        endpoint_id: &str,
        folder: &str,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            client,
            sink,
            model: model.to_string(),
            endpoint_id: endpoint_id.to_string(),
            folder: folder.to_string(),
            parameters,
        }
    }

    /// Flux.1 schnell: 1024x1024, 4 inference steps
    pub fn flux(client: Arc<VertexClient>, sink: ImageSink, model: &str, endpoint_id: &str) -> Self {
        Self::new(
            client,
            sink,
            model,
            endpoint_id,
            "flux1",
            json!({ "height": 1024, "width": 1024, "num_inference_steps": 4 }),
        )
    }

    /// Stable Diffusion: 1024x1024, 25 inference steps, guidance 7.5
    pub fn stable_diffusion(
        client: Arc<VertexClient>,
        sink: ImageSink,
        model: &str,
        endpoint_id: &str,
    ) -> Self {
        Self::new(
            client,
            sink,
            model,
            endpoint_id,
            "stablediffusion",
            json!({
                "height": 1024,
                "width": 1024,
                "num_inference_steps": 25,
                "guidance_scale": 7.5
            }),
        )
    }
}

#[async_trait]
impl ImageGenerator for EndpointImageGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    // Aspect ratio is fixed by the endpoint parameters
    async fn generate(&self, prompt: &str, _aspect_ratio: &str) -> Result<Vec<GeneratedImage>> {
        tracing::info!(
            model = %self.model,
            endpoint = %self.endpoint_id,
            folder = %self.folder,
            "Generating with endpoint model"
        );
        let start = Instant::now();

        let url = self.client.endpoint_url(&self.endpoint_id, "predict");
        let body = json!({
            "instances": [{ "text": prompt }],
            "parameters": self.parameters,
        });
        let response: PredictResponse = self.client.post_json(&self.model, &url, &body).await?;

        let outputs: Vec<&str> = response
            .predictions
            .iter()
            .filter_map(|p| {
                let data = image_data(p);
                if data.is_none() {
                    tracing::warn!(model = %self.model, "Prediction has no image data, skipping");
                }
                data
            })
            .collect();

        tracing::info!(
            model = %self.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            images = outputs.len(),
            "Endpoint responded"
        );

        let mut images = Vec::with_capacity(outputs.len());
        for (idx, data) in outputs.into_iter().enumerate() {
            match self
                .sink
                .save_base64(&self.model, prompt, &self.folder, "image/png", data)
                .await
            {
                Ok(image) => images.push(image),
                Err(e) => {
                    tracing::error!(model = %self.model, index = idx, error = %e, "Failed to store image")
                }
            }
        }

        if images.is_empty() {
            tracing::error!(model = %self.model, "No valid image data in endpoint predictions");
        }

        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_data_keys() {
        assert_eq!(image_data(&json!({ "output": "abc" })), Some("abc"));
        assert_eq!(image_data(&json!({ "bytesBase64Encoded": "def" })), Some("def"));
        assert_eq!(
            image_data(&json!({ "output": "abc", "bytesBase64Encoded": "def" })),
            Some("abc")
        );
        assert_eq!(image_data(&json!({ "mimeType": "image/png" })), None);
        assert_eq!(image_data(&json!({ "output": "" })), None);
    }
}
