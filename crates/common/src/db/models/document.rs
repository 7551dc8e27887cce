//! Generic document row shared by every collection

use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::FromQueryResult;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// Document type discriminator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    ImageMetadata,
    EloRating,
    Vote,
    Study,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::ImageMetadata => "image_metadata",
            DocType::EloRating => "elo_rating",
            DocType::Vote => "vote",
            DocType::Study => "study",
        }
    }
}

impl TryFrom<&str> for DocType {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "image_metadata" => Ok(DocType::ImageMetadata),
            "elo_rating" => Ok(DocType::EloRating),
            "vote" => Ok(DocType::Vote),
            "study" => Ok(DocType::Study),
            other => Err(format!("unknown document type `{}`", other)),
        }
    }
}

impl From<DocType> for String {
    fn from(doc_type: DocType) -> Self {
        doc_type.as_str().to_string()
    }
}

/// A typed record stored as a JSON document
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    const DOC_TYPE: DocType;

    /// Value of the timestamp column used for ordering
    fn timestamp(&self) -> chrono::DateTime<chrono::Utc>;
}

/// Raw row as stored in a collection table
#[derive(Clone, Debug, FromQueryResult)]
pub struct DocumentRow {
    pub id: Uuid,

    pub doc_type: Option<String>,

    /// Document body as JSONB
    pub data: serde_json::Value,

    pub timestamp: DateTimeWithTimeZone,
}

impl DocumentRow {
    /// Decode the body, `None` when the document does not match `T`
    pub fn decode<T: Document>(self) -> Option<T> {
        if self.doc_type.as_deref() != Some(T::DOC_TYPE.as_str()) {
            return None;
        }
        match serde_json::from_value(self.data) {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::warn!(id = %self.id, error = %e, "Skipping malformed document");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_type_round_trip_names() {
        for t in [DocType::ImageMetadata, DocType::EloRating, DocType::Vote, DocType::Study] {
            assert_eq!(DocType::try_from(t.as_str()), Ok(t));
        }
        assert!(DocType::try_from("thumbnail").is_err());
    }

    #[test]
    fn test_discriminator_matches_serde_name() {
        let json = serde_json::to_value(DocType::EloRating).unwrap();
        assert_eq!(json, serde_json::json!("elo_rating"));
    }
}
