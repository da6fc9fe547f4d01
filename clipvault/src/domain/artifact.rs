//! Intermediate and published media artifacts.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::QualityLabel;

/// Where a raw stream came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamOrigin {
    Downloaded,
    Uploaded,
}

/// A source stream sitting in the attempt workspace, before remuxing.
#[derive(Debug, Clone)]
pub struct RawStream {
    pub path: PathBuf,
    pub label: QualityLabel,
    pub origin: StreamOrigin,
}

/// A remuxed, probed stream ready to publish.
#[derive(Debug, Clone)]
pub struct NormalizedStream {
    pub path: PathBuf,
    pub label: QualityLabel,
    pub mime: String,
    pub size_bytes: u64,
    pub duration_secs: f64,
    pub height: Option<u32>,
    pub fps: Option<f64>,
}

impl NormalizedStream {
    /// File extension of the remuxed output, `mp4` when unknown.
    pub fn extension(&self) -> &str {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4")
    }
}

/// A variant uploaded to object storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedVariant {
    pub quality_label: QualityLabel,
    pub mime: String,
    pub size_bytes: u64,
    pub duration_secs: f64,
    pub storage_key: String,
    pub public_url: String,
}

/// The uploaded poster image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailArtifact {
    pub storage_key: String,
    pub public_url: String,
}
