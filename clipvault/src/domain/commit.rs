//! Metadata handed to the relational store on a committed ingestion.

use serde::Serialize;

use super::PublishedVariant;
use crate::{Error, Result};

/// Everything the metadata store writes in one transaction.
#[derive(Debug, Clone, Serialize)]
pub struct EventCommit {
    pub event_id: i64,
    /// Best variant's URL.
    pub video_url: String,
    pub original_clip_url: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Best quality first.
    pub variants: Vec<PublishedVariant>,
}

impl EventCommit {
    /// Build a commit, refusing to publish an event without variants.
    pub fn new(
        event_id: i64,
        variants: Vec<PublishedVariant>,
        original_clip_url: Option<String>,
        thumbnail_url: Option<String>,
    ) -> Result<Self> {
        let video_url = variants
            .first()
            .map(|v| v.public_url.clone())
            .ok_or(Error::ZeroVariants)?;
        Ok(Self {
            event_id,
            video_url,
            original_clip_url,
            thumbnail_url,
            variants,
        })
    }
}
