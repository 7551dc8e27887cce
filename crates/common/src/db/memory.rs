//! In-memory document store for local development and tests

use crate::db::models::*;
use crate::db::ArenaStore;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Collections {
    images: Vec<ImageMetadata>,
    ratings: HashMap<String, EloRatingRecord>,
    votes: Vec<VoteRecord>,
    studies: Vec<Study>,
}

/// Process-local store; contents are lost on shutdown
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Collections>,
    fail_image_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `add_image_metadata` fail
    pub fn with_failing_image_writes(self) -> Self {
        self.fail_image_writes.store(true, Ordering::Relaxed);
        self
    }

    /// Number of stored image documents
    pub async fn image_count(&self) -> usize {
        self.inner.read().await.images.len()
    }

    /// Number of stored votes across all studies
    pub async fn vote_count(&self) -> usize {
        self.inner.read().await.votes.len()
    }
}

fn newest_first<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> chrono::DateTime<chrono::Utc>,
{
    // Ties: most recently inserted first
    items.sort_by_key(|item| key(item));
    items.reverse();
}

#[async_trait]
impl ArenaStore for InMemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn add_image_metadata(&self, image: &ImageMetadata) -> Result<Uuid> {
        if self.fail_image_writes.load(Ordering::Relaxed) {
            return Err(AppError::Storage {
                message: "image metadata writes disabled".to_string(),
            });
        }
        self.inner.write().await.images.push(image.clone());
        Ok(Uuid::new_v4())
    }

    async fn find_images(&self, prompt: &str, model: &str) -> Result<Vec<ImageMetadata>> {
        let mut found: Vec<ImageMetadata> = self
            .inner
            .read()
            .await
            .images
            .iter()
            .filter(|img| img.prompt == prompt && img.model == model)
            .cloned()
            .collect();
        newest_first(&mut found, |img| img.timestamp);
        Ok(found)
    }

    async fn latest_ratings(&self, study: &str) -> Result<Option<EloRatingRecord>> {
        Ok(self.inner.read().await.ratings.get(study).cloned())
    }

    async fn save_ratings(&self, record: &EloRatingRecord) -> Result<()> {
        self.inner
            .write()
            .await
            .ratings
            .insert(record.study.clone(), record.clone());
        Ok(())
    }

    async fn append_vote(&self, vote: &VoteRecord) -> Result<Uuid> {
        self.inner.write().await.votes.push(vote.clone());
        Ok(Uuid::new_v4())
    }

    async fn latest_votes(&self, study: &str, limit: u64) -> Result<Vec<VoteRecord>> {
        let mut votes: Vec<VoteRecord> = self
            .inner
            .read()
            .await
            .votes
            .iter()
            .filter(|v| v.study == study)
            .cloned()
            .collect();
        newest_first(&mut votes, |v| v.timestamp);
        votes.truncate(limit as usize);
        Ok(votes)
    }

    async fn list_studies(&self) -> Result<Vec<Study>> {
        let mut studies = self.inner.read().await.studies.clone();
        newest_first(&mut studies, |s| s.created_at);
        Ok(studies)
    }

    async fn add_study(&self, study: &Study) -> Result<Uuid> {
        self.inner.write().await.studies.push(study.clone());
        Ok(Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn vote_at(study: &str, minutes_ago: i64, winner: &str) -> VoteRecord {
        VoteRecord {
            study: study.to_string(),
            model1: "a".into(),
            model2: "b".into(),
            image1: "gs://bucket/a.png".into(),
            image2: "gs://bucket/b.png".into(),
            winner: winner.into(),
            prompt: "a red fox".into(),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn test_latest_votes_newest_first_and_limited() {
        let store = InMemoryStore::new();
        for i in 0..15 {
            store.append_vote(&vote_at("live", i, "a")).await.unwrap();
        }
        store.append_vote(&vote_at("other", 0, "b")).await.unwrap();

        let votes = store.latest_votes("live", 10).await.unwrap();
        assert_eq!(votes.len(), 10);
        assert!(votes.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert!(votes.iter().all(|v| v.study == "live"));
    }

    #[tokio::test]
    async fn test_ratings_are_a_singleton_per_study() {
        let store = InMemoryStore::new();
        assert!(store.latest_ratings("live").await.unwrap().is_none());

        let mut record = EloRatingRecord::empty("live");
        record.ratings.set("a", 1016.0);
        store.save_ratings(&record).await.unwrap();

        record.ratings.set("a", 1030.0);
        store.save_ratings(&record).await.unwrap();

        let stored = store.latest_ratings("live").await.unwrap().unwrap();
        assert_eq!(stored.ratings.rating("a"), 1030.0);
        assert!(store.latest_ratings("spring").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_images_matches_prompt_and_model() {
        let store = InMemoryStore::new();
        store
            .add_image_metadata(&ImageMetadata::new("gs://b/1.png", "a cat", "imagen"))
            .await
            .unwrap();
        store
            .add_image_metadata(&ImageMetadata::new("gs://b/2.png", "a cat", "flux"))
            .await
            .unwrap();

        let found = store.find_images("a cat", "imagen").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].gcsuri, "gs://b/1.png");
        assert!(store.find_images("a dog", "imagen").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_image_writes() {
        let store = InMemoryStore::new().with_failing_image_writes();
        tokio_test::assert_err!(
            store
                .add_image_metadata(&ImageMetadata::new("gs://b/1.png", "p", "m"))
                .await
        );
        assert_eq!(store.image_count().await, 0);
    }
}
