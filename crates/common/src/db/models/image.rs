//! Image metadata document

use super::document::{DocType, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata of one stored image. Written once, never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// `gs://bucket/path` of the stored image
    pub gcsuri: String,

    pub prompt: String,

    /// Model identifier that produced the image
    pub model: String,

    pub timestamp: DateTime<Utc>,
}

impl ImageMetadata {
    pub fn new(gcsuri: impl Into<String>, prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            gcsuri: gcsuri.into(),
            prompt: prompt.into(),
            model: model.into(),
            timestamp: Utc::now(),
        }
    }
}

impl Document for ImageMetadata {
    const DOC_TYPE: DocType = DocType::ImageMetadata;

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
