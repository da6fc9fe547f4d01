//! Transactional operations for events and their variants.
//!
//! These methods operate within an existing transaction and do NOT commit.
//! The caller is responsible for committing or rolling back the transaction.

use sqlx::SqliteConnection;

use crate::database::time::now_ms;
use crate::domain::{EventCommit, PublishedVariant};
use crate::{Error, Result};

pub struct EventTxOps;

impl EventTxOps {
    /// Fail with `NotFound` unless the event row exists.
    pub async fn ensure_event_exists(tx: &mut SqliteConnection, event_id: i64) -> Result<()> {
        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM events WHERE id = ?")
            .bind(event_id)
            .fetch_optional(&mut *tx)
            .await?;
        exists
            .map(|_| ())
            .ok_or_else(|| Error::not_found("Event", event_id.to_string()))
    }

    /// Delete all variant rows of an event and insert `variants` in their place.
    pub async fn replace_variants(
        tx: &mut SqliteConnection,
        event_id: i64,
        variants: &[PublishedVariant],
    ) -> Result<()> {
        sqlx::query("DELETE FROM event_videos WHERE event_id = ?")
            .bind(event_id)
            .execute(&mut *tx)
            .await?;

        let now = now_ms();
        for variant in variants {
            sqlx::query(
                r#"
                INSERT INTO event_videos
                    (event_id, quality_label, mime, filesize, duration_s, storage_key, public_url, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(event_id)
            .bind(variant.quality_label.as_str())
            .bind(&variant.mime)
            .bind(i64::try_from(variant.size_bytes).unwrap_or(i64::MAX))
            .bind(variant.duration_secs)
            .bind(&variant.storage_key)
            .bind(&variant.public_url)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        Ok(())
    }

    /// Point the event at its new media and mark it published.
    ///
    /// A missing thumbnail or clip URL keeps the previous value.
    pub async fn publish_event(tx: &mut SqliteConnection, commit: &EventCommit) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE events
            SET video_url = ?,
                original_clip_url = COALESCE(?, original_clip_url),
                thumbnail_url = COALESCE(?, thumbnail_url),
                published = 1,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&commit.video_url)
        .bind(commit.original_clip_url.as_deref())
        .bind(commit.thumbnail_url.as_deref())
        .bind(now_ms())
        .bind(commit.event_id)
        .execute(&mut *tx)
        .await?;
        Ok(())
    }
}
