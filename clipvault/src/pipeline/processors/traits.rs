//! Capability traits for the external media tools.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use crate::Result;
use crate::domain::{ClipUrl, NormalizedStream, QualityLabel, RawStream};

/// One downloadable format of a remote clip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rendition {
    /// Downloader-specific format selector.
    pub format_id: String,
    pub label: QualityLabel,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    /// Container extension reported by the downloader.
    pub ext: Option<String>,
    pub has_audio: bool,
    pub filesize: Option<u64>,
}

impl Rendition {
    pub fn new(format_id: impl Into<String>, label: impl Into<QualityLabel>) -> Self {
        Self {
            format_id: format_id.into(),
            label: label.into(),
            height: None,
            fps: None,
            ext: Some("mp4".to_string()),
            has_audio: true,
            filesize: None,
        }
    }
}

/// Result of probing a remote clip.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClipInfo {
    pub id: String,
    pub title: Option<String>,
    pub duration_secs: Option<f64>,
    pub renditions: Vec<Rendition>,
}

/// Lists and downloads renditions of a remote clip.
#[async_trait]
pub trait ClipDownloader: Send + Sync {
    /// Probe the clip without downloading media.
    async fn probe(&self, locator: &ClipUrl) -> Result<ClipInfo>;

    /// Download one rendition into `output_dir`.
    async fn download(
        &self,
        locator: &ClipUrl,
        rendition: &Rendition,
        output_dir: &Path,
    ) -> Result<RawStream>;
}

/// Rewraps a raw stream into the canonical container and probes it.
#[async_trait]
pub trait Remuxer: Send + Sync {
    async fn remux(&self, input: &RawStream, output_dir: &Path) -> Result<NormalizedStream>;
}

/// Extracts a still frame from a stream.
#[async_trait]
pub trait ThumbnailExtractor: Send + Sync {
    /// Write one frame at `at_secs` to `output` and return the written path.
    async fn extract(&self, input: &NormalizedStream, at_secs: f64, output: &Path)
    -> Result<PathBuf>;
}
