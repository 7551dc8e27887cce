//! Vote document, append-only audit log of comparisons

use super::document::{DocType, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub study: String,

    pub model1: String,

    pub model2: String,

    /// URI of the image shown for `model1`
    pub image1: String,

    /// URI of the image shown for `model2`
    pub image2: String,

    /// Name of the preferred model
    pub winner: String,

    pub prompt: String,

    pub timestamp: DateTime<Utc>,
}

impl Document for VoteRecord {
    const DOC_TYPE: DocType = DocType::Vote;

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
