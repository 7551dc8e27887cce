//! ELO rating document, one per study

use super::document::{DocType, Document};
use crate::elo::EloRatings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EloRatingRecord {
    pub study: String,

    /// Rating per model name
    #[serde(default)]
    pub ratings: EloRatings,

    pub timestamp: DateTime<Utc>,
}

impl EloRatingRecord {
    /// Fresh record where every model is at the default rating
    pub fn empty(study: impl Into<String>) -> Self {
        Self {
            study: study.into(),
            ratings: EloRatings::new(),
            timestamp: Utc::now(),
        }
    }
}

impl Document for EloRatingRecord {
    const DOC_TYPE: DocType = DocType::EloRating;

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
