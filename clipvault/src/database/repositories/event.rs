//! Event repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::EventTxOps;
use crate::database::models::{EventDbModel, EventVideoDbModel, NewEvent};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::domain::{EventCommit, QualityLabel};
use crate::pipeline::MetadataSink;
use crate::{Error, Result};

/// Event repository trait.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Insert an unpublished draft row and return its id.
    async fn create_draft(&self, event: &NewEvent) -> Result<i64>;
    /// Delete the event only if it is still an unpublished draft.
    async fn discard_draft(&self, id: i64) -> Result<bool>;
    async fn get_event(&self, id: i64) -> Result<EventDbModel>;
    /// Variant rows of an event, best quality first.
    async fn list_variants(&self, event_id: i64) -> Result<Vec<EventVideoDbModel>>;
    /// Update URLs, replace variant rows and mark published, atomically.
    ///
    /// Not retried on contention; failures surface as `MetadataCommit`.
    async fn commit_ingestion(&self, commit: &EventCommit) -> Result<()>;
    /// Delete an event and (by cascade) its variant rows.
    async fn delete_event(&self, id: i64) -> Result<bool>;
}

/// SQLx implementation of EventRepository.
#[derive(Clone)]
pub struct SqlxEventRepository {
    pool: SqlitePool,
}

impl SqlxEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn commit_once(&self, commit: &EventCommit) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        EventTxOps::ensure_event_exists(&mut *tx, commit.event_id).await?;
        EventTxOps::replace_variants(&mut *tx, commit.event_id, &commit.variants).await?;
        EventTxOps::publish_event(&mut *tx, commit).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl EventRepository for SqlxEventRepository {
    async fn create_draft(&self, event: &NewEvent) -> Result<i64> {
        if event.title.trim().is_empty() {
            return Err(Error::validation("event title cannot be empty"));
        }

        retry_on_sqlite_busy("create_draft", || async {
            let now = now_ms();
            let result = sqlx::query(
                r#"
                INSERT INTO events (slug, title, body, published, created_at, updated_at)
                VALUES (?, ?, ?, 0, ?, ?)
                "#,
            )
            .bind(event.slug.as_deref())
            .bind(event.title.trim())
            .bind(&event.body)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok(result.last_insert_rowid())
        })
        .await
    }

    async fn discard_draft(&self, id: i64) -> Result<bool> {
        retry_on_sqlite_busy("discard_draft", || async {
            let result = sqlx::query("DELETE FROM events WHERE id = ? AND published = 0")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn get_event(&self, id: i64) -> Result<EventDbModel> {
        sqlx::query_as::<_, EventDbModel>("SELECT * FROM events WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Event", id.to_string()))
    }

    async fn list_variants(&self, event_id: i64) -> Result<Vec<EventVideoDbModel>> {
        let mut rows = sqlx::query_as::<_, EventVideoDbModel>(
            "SELECT * FROM event_videos WHERE event_id = ? ORDER BY id",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        // Labels carry the ordering; SQL cannot parse them.
        rows.sort_by_cached_key(|row| QualityLabel::new(&row.quality_label));
        Ok(rows)
    }

    async fn commit_ingestion(&self, commit: &EventCommit) -> Result<()> {
        if commit.variants.is_empty() {
            return Err(Error::ZeroVariants);
        }

        // Runs exactly once: a failed commit aborts the attempt and its
        // uploads are rolled back, so the write must not outlive the caller.
        self.commit_once(commit).await.map_err(|e| match e {
            Error::NotFound { .. } | Error::MetadataCommit(_) => e,
            other => Error::MetadataCommit(other.to_string()),
        })
    }

    async fn delete_event(&self, id: i64) -> Result<bool> {
        retry_on_sqlite_busy("delete_event", || async {
            let result = sqlx::query("DELETE FROM events WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }
}

#[async_trait]
impl MetadataSink for SqlxEventRepository {
    async fn commit_ingestion(&self, commit: &EventCommit) -> Result<()> {
        EventRepository::commit_ingestion(self, commit).await
    }
}
