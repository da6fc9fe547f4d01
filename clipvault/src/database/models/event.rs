//! Event and event video database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{PublishedVariant, QualityLabel};

/// Event database model.
///
/// A draft (`published = false`) only reserves the id while its first
/// ingestion runs.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EventDbModel {
    pub id: i64,
    pub slug: Option<String>,
    pub title: String,
    pub body: String,
    /// Public URL of the best variant.
    pub video_url: Option<String>,
    /// Remote locator the event was ingested from, if any.
    pub original_clip_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub published: bool,
    /// Unix epoch milliseconds (UTC).
    pub created_at: i64,
    /// Unix epoch milliseconds (UTC).
    pub updated_at: i64,
}

/// One published quality variant of an event.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EventVideoDbModel {
    pub id: i64,
    pub event_id: i64,
    pub quality_label: String,
    pub mime: String,
    pub filesize: i64,
    pub duration_s: f64,
    pub storage_key: String,
    pub public_url: String,
    pub created_at: i64,
}

impl EventVideoDbModel {
    pub fn label(&self) -> QualityLabel {
        QualityLabel::new(&self.quality_label)
    }
}

impl From<EventVideoDbModel> for PublishedVariant {
    fn from(row: EventVideoDbModel) -> Self {
        Self {
            quality_label: QualityLabel::new(row.quality_label),
            mime: row.mime,
            size_bytes: u64::try_from(row.filesize).unwrap_or(0),
            duration_secs: row.duration_s,
            storage_key: row.storage_key,
            public_url: row.public_url,
        }
    }
}

/// Fields for a new event row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEvent {
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub slug: Option<String>,
}

impl NewEvent {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }
}
