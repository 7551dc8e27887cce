//! Prompt lists for arena rounds
//!
//! A prompt file is a JSON object with the prompt list under `imagen`.

use rand::seq::SliceRandom;
use serde::Deserialize;
use std::path::Path;

/// Returned when no prompts are loaded
pub const DEFAULT_PROMPT: &str = "Default prompt: No prompts available.";

#[derive(Debug, Default, Deserialize)]
struct PromptFile {
    #[serde(default)]
    imagen: Vec<String>,
}

/// In-memory prompt list loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct PromptManager {
    prompts: Vec<String>,
}

impl PromptManager {
    pub fn new(prompts: Vec<String>) -> Self {
        Self { prompts }
    }

    /// Load prompts from `path`; a missing or invalid file yields an empty list
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Prompt file not found");
                return Self::default();
            }
        };

        match serde_json::from_str::<PromptFile>(&contents) {
            Ok(file) => {
                tracing::info!(path = %path.display(), count = file.imagen.len(), "Prompts loaded");
                Self::new(file.imagen)
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Prompt file is not valid JSON");
                Self::default()
            }
        }
    }

    /// A uniformly random prompt, or `DEFAULT_PROMPT` when there are none
    pub fn random_prompt(&self) -> String {
        self.prompts
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| DEFAULT_PROMPT.to_string())
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_load_and_pick() {
        let file = temp_file(r#"{"imagen": ["a paper boat", "a glass apple"]}"#);
        let prompts = PromptManager::load(file.path()).await;
        assert_eq!(prompts.len(), 2);

        let picked = prompts.random_prompt();
        assert!(picked == "a paper boat" || picked == "a glass apple");
    }

    #[tokio::test]
    async fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let prompts = PromptManager::load(dir.path().join("imagen_prompts.json")).await;
        assert!(prompts.is_empty());
        assert_eq!(prompts.random_prompt(), DEFAULT_PROMPT);
    }

    #[tokio::test]
    async fn test_invalid_json_falls_back() {
        let file = temp_file("{ imagen: ");
        let prompts = PromptManager::load(file.path()).await;
        assert!(prompts.is_empty());
        assert_eq!(prompts.random_prompt(), DEFAULT_PROMPT);
    }
}
