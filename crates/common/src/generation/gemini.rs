//! Gemini image output and text generation

use super::vertex::VertexClient;
use super::{GeneratedImage, ImageGenerator, ImageSink, TextGenerator, GEMINI_LABEL};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Prompt used for the arena greeting
pub const WELCOME_PROMPT: &str = "Welcome the user to the battle of the generative media images, \
and encourage participation by asserting their voting on the images presented. \
This should be one or two sentences.";

/// Returned when text generation is unavailable
pub const WELCOME_FALLBACK: &str =
    "Welcome to the arena! Pick the image you prefer for each prompt.";

const OUTPUT_FOLDER: &str = "gemini2";

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

impl GenerateContentResponse {
    fn parts(self) -> impl Iterator<Item = Part> {
        self.candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
    }
}

fn request_body(prompt: &str, modalities: &[&str]) -> serde_json::Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": { "responseModalities": modalities }
    })
}

/// Gemini with image output, compared as `gemini2`
pub struct GeminiImageGenerator {
    client: Arc<VertexClient>,
    sink: ImageSink,
    model: String,
}

impl GeminiImageGenerator {
    pub fn new(client: Arc<VertexClient>, sink: ImageSink, model: &str) -> Self {
        Self {
            client,
            sink,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ImageGenerator for GeminiImageGenerator {
    fn model_name(&self) -> &str {
        GEMINI_LABEL
    }

    async fn generate(&self, prompt: &str, _aspect_ratio: &str) -> Result<Vec<GeneratedImage>> {
        tracing::info!(model = %self.model, prompt = prompt, "Generating with Gemini");

        let url = self.client.publisher_model_url(&self.model, "generateContent");
        let response: GenerateContentResponse = self
            .client
            .post_json(&self.model, &url, &request_body(prompt, &["TEXT", "IMAGE"]))
            .await?;

        let mut images = Vec::new();
        for part in response.parts() {
            if let Some(inline) = part.inline_data {
                images.push(
                    self.sink
                        .save_base64(GEMINI_LABEL, prompt, OUTPUT_FOLDER, &inline.mime_type, &inline.data)
                        .await?,
                );
            }
        }

        if images.is_empty() {
            return Err(AppError::Generation {
                model: self.model.clone(),
                message: "response contained no image".to_string(),
            });
        }

        Ok(images)
    }
}

/// Gemini text completions
pub struct GeminiTextGenerator {
    client: Arc<VertexClient>,
    model: String,
}

impl GeminiTextGenerator {
    pub fn new(client: Arc<VertexClient>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }

    async fn try_generate(&self, prompt: &str) -> Result<String> {
        let url = self.client.publisher_model_url(&self.model, "generateContent");
        let response: GenerateContentResponse = self
            .client
            .post_json(&self.model, &url, &request_body(prompt, &["TEXT"]))
            .await?;

        let text: String = response.parts().filter_map(|p| p.text).collect();
        if text.trim().is_empty() {
            return Err(AppError::Generation {
                model: self.model.clone(),
                message: "empty text response".to_string(),
            });
        }
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl TextGenerator for GeminiTextGenerator {
    async fn generate_text(&self, prompt: &str) -> String {
        match self.try_generate(prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(model = %self.model, error = %e, "Text generation failed, using fallback");
                WELCOME_FALLBACK.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_modalities() {
        let body = request_body("a paper crane", &["TEXT", "IMAGE"]);
        assert_eq!(body["generationConfig"]["responseModalities"], json!(["TEXT", "IMAGE"]));
        assert_eq!(body["contents"][0]["parts"][0]["text"], "a paper crane");
    }

    #[test]
    fn test_parts_flatten_candidates() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "Here is your crane." },
                        { "inlineData": { "mimeType": "image/png", "data": "iVBORw0KGgo=" } }
                    ]
                }
            }]
        }))
        .unwrap();

        let parts: Vec<Part> = response.parts().collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].text.as_deref(), Some("Here is your crane."));
        assert_eq!(parts[1].inline_data.as_ref().unwrap().mime_type, "image/png");
    }

    #[tokio::test]
    async fn test_text_falls_back_when_unreachable() {
        let mut config = crate::config::AppConfig::in_memory();
        config.gcp.project_id = Some("demo".to_string());
        config.generation.api_base = Some("http://127.0.0.1:9/v1".to_string());
        config.generation.backoff_base_ms = 1;
        config.generation.timeout_secs = 2;

        let client = Arc::new(
            VertexClient::new(&config, Arc::new(crate::auth::StaticTokenProvider::new("t")))
                .unwrap(),
        );
        let text = GeminiTextGenerator::new(client, "gemini-2.0-flash")
            .generate_text(WELCOME_PROMPT)
            .await;
        assert_eq!(text, WELCOME_FALLBACK);
    }
}
