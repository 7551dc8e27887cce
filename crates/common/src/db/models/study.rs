//! Study definition document

use super::document::{DocType, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named set of prompts and models compared against each other
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Study {
    pub label: String,

    /// Prompt file for this study
    pub prompts_location: String,

    /// Models taking part; empty means every registered model
    #[serde(default)]
    pub models: Vec<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Document for Study {
    const DOC_TYPE: DocType = DocType::Study;

    fn timestamp(&self) -> DateTime<Utc> {
        self.created_at
    }
}
