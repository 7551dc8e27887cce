//! Postgres-backed document store
//!
//! Each collection is a table of JSONB documents with a type discriminator
//! and a timestamp column. Table names come from configuration, so queries
//! are raw statements.

use crate::config::CollectionsConfig;
use crate::db::models::*;
use crate::db::{ArenaStore, DbPool};
use crate::errors::Result;
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DbBackend, FromQueryResult, Statement};
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
    collections: CollectionsConfig,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool, collections: CollectionsConfig) -> Self {
        Self { pool, collections }
    }

    async fn insert<T: Document>(&self, table: &str, doc: &T) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let data = serde_json::to_value(doc)?;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                "INSERT INTO {} (id, doc_type, data, timestamp) VALUES ($1, $2, $3, $4)",
                table
            ),
            vec![
                id.into(),
                String::from(T::DOC_TYPE).into(),
                data.into(),
                doc.timestamp().into(),
            ],
        );

        self.pool.conn().execute(stmt).await?;
        Ok(id)
    }

    async fn query<T: Document>(&self, sql: String, values: Vec<sea_orm::Value>) -> Result<Vec<T>> {
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, values);

        let rows = DocumentRow::find_by_statement(stmt)
            .all(self.pool.conn())
            .await?;

        Ok(rows.into_iter().filter_map(DocumentRow::decode).collect())
    }
}

#[async_trait]
impl ArenaStore for Repository {
    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    async fn ensure_schema(&self) -> Result<()> {
        for table in [
            &self.collections.images,
            &self.collections.ratings,
            &self.collections.studies,
        ] {
            tracing::info!(table = %table, "Ensuring collection");

            self.pool
                .conn()
                .execute_unprepared(&format!(
                    r#"
                    CREATE TABLE IF NOT EXISTS {table} (
                        id UUID PRIMARY KEY,
                        doc_type TEXT,
                        data JSONB NOT NULL,
                        timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    )
                    "#
                ))
                .await?;

            self.pool
                .conn()
                .execute_unprepared(&format!(
                    "CREATE INDEX IF NOT EXISTS {table}_type_ts_idx ON {table} (doc_type, timestamp DESC)"
                ))
                .await?;
        }

        self.pool
            .conn()
            .execute_unprepared(&format!(
                "CREATE INDEX IF NOT EXISTS {t}_prompt_model_idx ON {t} ((data->>'prompt'), (data->>'model'))",
                t = self.collections.images
            ))
            .await?;

        Ok(())
    }

    async fn add_image_metadata(&self, image: &ImageMetadata) -> Result<Uuid> {
        let id = self.insert(&self.collections.images, image).await?;
        tracing::debug!(id = %id, gcsuri = %image.gcsuri, "Image metadata stored");
        Ok(id)
    }

    async fn find_images(&self, prompt: &str, model: &str) -> Result<Vec<ImageMetadata>> {
        let sql = format!(
            r#"
            SELECT id, doc_type, data, timestamp
            FROM {}
            WHERE doc_type = $1
              AND data->>'prompt' = $2
              AND data->>'model' = $3
            ORDER BY timestamp DESC
            "#,
            self.collections.images
        );

        self.query(
            sql,
            vec![
                DocType::ImageMetadata.as_str().into(),
                prompt.into(),
                model.into(),
            ],
        )
        .await
    }

    async fn latest_ratings(&self, study: &str) -> Result<Option<EloRatingRecord>> {
        let sql = format!(
            r#"
            SELECT id, doc_type, data, timestamp
            FROM {}
            WHERE doc_type = $1 AND data->>'study' = $2
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
            self.collections.ratings
        );

        let records: Vec<EloRatingRecord> = self
            .query(sql, vec![DocType::EloRating.as_str().into(), study.into()])
            .await?;

        Ok(records.into_iter().next())
    }

    async fn save_ratings(&self, record: &EloRatingRecord) -> Result<()> {
        let data = serde_json::to_value(record)?;

        // Update the study's singleton in place, insert it on first vote
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                r#"
                WITH updated AS (
                    UPDATE {t} SET data = $1, timestamp = $2
                    WHERE doc_type = $3 AND data->>'study' = $4
                    RETURNING id
                )
                INSERT INTO {t} (id, doc_type, data, timestamp)
                SELECT $5, $3, $1, $2
                WHERE NOT EXISTS (SELECT 1 FROM updated)
                "#,
                t = self.collections.ratings
            ),
            vec![
                data.into(),
                record.timestamp.into(),
                DocType::EloRating.as_str().into(),
                record.study.clone().into(),
                Uuid::new_v4().into(),
            ],
        );

        self.pool.conn().execute(stmt).await?;
        tracing::debug!(study = %record.study, models = record.ratings.len(), "Ratings saved");
        Ok(())
    }

    async fn append_vote(&self, vote: &VoteRecord) -> Result<Uuid> {
        self.insert(&self.collections.ratings, vote).await
    }

    async fn latest_votes(&self, study: &str, limit: u64) -> Result<Vec<VoteRecord>> {
        let sql = format!(
            r#"
            SELECT id, doc_type, data, timestamp
            FROM {}
            WHERE doc_type = $1 AND data->>'study' = $2
            ORDER BY timestamp DESC
            LIMIT $3
            "#,
            self.collections.ratings
        );

        self.query(
            sql,
            vec![
                DocType::Vote.as_str().into(),
                study.into(),
                (limit as i64).into(),
            ],
        )
        .await
    }

    async fn list_studies(&self) -> Result<Vec<Study>> {
        let sql = format!(
            r#"
            SELECT id, doc_type, data, timestamp
            FROM {}
            WHERE doc_type = $1
            ORDER BY timestamp DESC
            "#,
            self.collections.studies
        );

        self.query(sql, vec![DocType::Study.as_str().into()]).await
    }

    async fn add_study(&self, study: &Study) -> Result<Uuid> {
        self.insert(&self.collections.studies, study).await
    }
}
