//! Thumbnail extraction.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use process_utils::{run_captured, tokio_command};
use tracing::{debug, info};

use super::traits::ThumbnailExtractor;
use crate::domain::NormalizedStream;
use crate::{Error, Result};

/// Frame rate assumed when the probe did not report one.
const DEFAULT_FPS: f64 = 30.0;

/// JPEG quality passed to `-q:v` (2 is near-lossless).
const JPEG_QUALITY: &str = "2";

/// Pick the stream to take the thumbnail from: tallest, then highest fps.
///
/// Probed dimensions win over the label; streams without a probed height fall
/// back to the height encoded in their label.
pub fn select_thumbnail_source(streams: &[NormalizedStream]) -> Option<&NormalizedStream> {
    streams.iter().min_by(|a, b| {
        let height = |s: &NormalizedStream| s.height.or_else(|| s.label.height()).unwrap_or(0);
        let fps = |s: &NormalizedStream| s.fps.unwrap_or(0.0);
        height(b)
            .cmp(&height(a))
            .then_with(|| fps(b).total_cmp(&fps(a)))
            .then_with(|| a.label.cmp(&b.label))
    })
}

/// Timestamp of the thumbnail frame.
///
/// `fraction` of the duration, but at least one frame in and at most one
/// frame before the end.
pub fn thumbnail_offset(duration_secs: f64, fps: Option<f64>, fraction: f64) -> f64 {
    let fps = fps.filter(|f| f.is_finite() && *f > 0.0).unwrap_or(DEFAULT_FPS);
    let frame = 1.0 / fps;
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return 0.0;
    }
    let latest = (duration_secs - frame).max(0.0);
    (duration_secs * fraction).max(frame).min(latest)
}

/// [`ThumbnailExtractor`] backed by ffmpeg.
pub struct FfmpegThumbnailer {
    ffmpeg_path: String,
}

impl FfmpegThumbnailer {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

impl Default for FfmpegThumbnailer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl ThumbnailExtractor for FfmpegThumbnailer {
    async fn extract(
        &self,
        input: &NormalizedStream,
        at_secs: f64,
        output: &Path,
    ) -> Result<PathBuf> {
        info!(
            "Extracting thumbnail from {} at {:.3}s",
            input.path.display(),
            at_secs
        );

        let mut cmd = tokio_command(&self.ffmpeg_path);
        cmd.args(["-y", "-hide_banner", "-loglevel", "error", "-ss"])
            .arg(format!("{at_secs:.3}"))
            .arg("-i")
            .arg(&input.path)
            .args(["-frames:v", "1", "-q:v", JPEG_QUALITY])
            .arg(output)
            .env("LC_ALL", "C");

        run_captured("ffmpeg", &mut cmd)
            .await
            .map_err(|e| Error::Thumbnail(e.to_string()))?;

        let size = tokio::fs::metadata(output)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if size == 0 {
            return Err(Error::Thumbnail(format!(
                "ffmpeg produced no frame at {at_secs:.3}s"
            )));
        }

        debug!(path = %output.display(), size, "Thumbnail written");
        Ok(output.to_path_buf())
    }
}
