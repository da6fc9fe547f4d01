//! Remote clip downloader backed by yt-dlp.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use process_utils::{run_captured, tokio_command};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use super::traits::{ClipDownloader, ClipInfo, Rendition};
use crate::domain::{ClipUrl, QualityLabel, RawStream, StreamOrigin};
use crate::{Error, Result};

const TWITCH_REFERER: &str = "Referer:https://www.twitch.tv/";
const USER_AGENT: &str = "Mozilla/5.0";
/// Twitch web player client id.
const TWITCH_CLIENT_ID: &str = "twitch:client_id=kimne78kx3ncx6brgo4mv6wki5h1ko";

/// Request options shared by the metadata lookup and every download.
const TWITCH_REQUEST_ARGS: [&str; 6] = [
    "--add-header",
    TWITCH_REFERER,
    "--user-agent",
    USER_AGENT,
    "--extractor-args",
    TWITCH_CLIENT_ID,
];

/// Format selector used when the extractor reports no per-height formats.
const BEST_FORMAT: &str = "b";

/// Subset of the `yt-dlp --dump-single-json` payload.
#[derive(Debug, Deserialize)]
struct VideoInfo {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    formats: Vec<FormatInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct FormatInfo {
    format_id: Option<String>,
    height: Option<i64>,
    fps: Option<f64>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    filesize: Option<i64>,
    filesize_approx: Option<i64>,
}

impl FormatInfo {
    fn has_video(&self) -> bool {
        self.height.is_some_and(|h| h > 0) && self.vcodec.as_deref() != Some("none")
    }

    /// Missing codec info is treated as muxed, which is what clip hosts serve.
    fn has_audio(&self) -> bool {
        self.acodec.as_deref() != Some("none")
    }

    fn is_mp4(&self) -> bool {
        self.ext.as_deref() == Some("mp4")
    }

    fn into_rendition(self) -> Option<Rendition> {
        let format_id = self.format_id.clone().filter(|id| !id.is_empty())?;
        let height = u32::try_from(self.height?).ok().filter(|h| *h > 0)?;
        Some(Rendition {
            label: QualityLabel::from_dimensions(height, self.fps),
            has_audio: self.has_audio(),
            format_id,
            height: Some(height),
            fps: self.fps,
            ext: self.ext,
            filesize: self
                .filesize
                .or(self.filesize_approx)
                .and_then(|s| u64::try_from(s).ok()),
        })
    }
}

/// Reduce formats to one rendition per distinct quality label.
///
/// Within a label, formats carrying audio win over video-only ones and MP4
/// wins over other containers; among equals the later entry wins, since
/// extractors list formats worst to best. The result is ordered best-first.
fn collapse_formats(formats: Vec<FormatInfo>) -> Vec<Rendition> {
    let mut by_label: BTreeMap<QualityLabel, (FormatInfo, Rendition)> = BTreeMap::new();
    for format in formats.into_iter().filter(FormatInfo::has_video) {
        let Some(rendition) = format.clone().into_rendition() else {
            continue;
        };
        let replace = match by_label.get(&rendition.label) {
            None => true,
            Some((current, _)) => {
                (format.has_audio(), format.is_mp4()) >= (current.has_audio(), current.is_mp4())
            }
        };
        if replace {
            by_label.insert(rendition.label.clone(), (format, rendition));
        }
    }
    by_label.into_values().map(|(_, r)| r).collect()
}

fn parse_probe(stdout: &str) -> Result<ClipInfo> {
    let info: VideoInfo = serde_json::from_str(stdout)?;
    let had_formats = !info.formats.is_empty();
    let mut renditions = collapse_formats(info.formats);
    if renditions.is_empty() && had_formats {
        renditions.push(Rendition::new(BEST_FORMAT, QualityLabel::source()));
    }
    Ok(ClipInfo {
        id: info.id.unwrap_or_else(|| "clip".to_string()),
        title: info.title,
        duration_secs: info.duration.filter(|d| d.is_finite() && *d > 0.0),
        renditions,
    })
}

/// [`ClipDownloader`] that shells out to yt-dlp.
pub struct YtDlpDownloader {
    ytdlp_path: String,
}

impl YtDlpDownloader {
    pub fn new(ytdlp_path: impl Into<String>) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
        }
    }

    fn metadata_command(&self, locator: &ClipUrl) -> Command {
        let mut cmd = tokio_command(&self.ytdlp_path);
        cmd.args([
            "--dump-single-json",
            "--skip-download",
            "--no-warnings",
            "--no-progress",
            "--no-playlist",
        ])
        .args(TWITCH_REQUEST_ARGS)
        .arg(locator.as_str());
        cmd
    }

    fn download_command(&self, locator: &ClipUrl, rendition: &Rendition, target: &Path) -> Command {
        let mut cmd = tokio_command(&self.ytdlp_path);
        cmd.args([
            "--no-warnings",
            "--no-progress",
            "--no-playlist",
            "--no-part",
            "--force-overwrites",
        ])
        .args(TWITCH_REQUEST_ARGS)
        .args(["-f", rendition.format_id.as_str(), "-o"])
        .arg(target)
        .arg(locator.as_str());
        cmd
    }
}

impl Default for YtDlpDownloader {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

#[async_trait]
impl ClipDownloader for YtDlpDownloader {
    async fn probe(&self, locator: &ClipUrl) -> Result<ClipInfo> {
        let mut cmd = self.metadata_command(locator);

        debug!(clip = %locator.slug(), "Probing clip");
        let output = run_captured("yt-dlp", &mut cmd)
            .await
            .map_err(|e| Error::download("probe", e.to_string()))?;
        let info = parse_probe(&output.stdout)
            .map_err(|e| Error::download("probe", format!("unreadable probe output: {e}")))?;

        info!(
            clip = %locator.slug(),
            renditions = info.renditions.len(),
            "Probed clip"
        );
        Ok(info)
    }

    async fn download(
        &self,
        locator: &ClipUrl,
        rendition: &Rendition,
        output_dir: &Path,
    ) -> Result<RawStream> {
        let ext = rendition.ext.as_deref().unwrap_or("mp4");
        let target = output_dir.join(format!("{}.{}", rendition.label.key_safe(), ext));

        let mut cmd = self.download_command(locator, rendition, &target);

        debug!(quality = %rendition.label, format = %rendition.format_id, "Downloading rendition");
        run_captured("yt-dlp", &mut cmd)
            .await
            .map_err(|e| Error::download(rendition.label.as_str(), e.to_string()))?;

        let size = tokio::fs::metadata(&target)
            .await
            .map(|m| m.len())
            .map_err(|e| {
                Error::download(rendition.label.as_str(), format!("no output file: {e}"))
            })?;
        if size == 0 {
            return Err(Error::download(rendition.label.as_str(), "downloaded file is empty"));
        }

        info!(quality = %rendition.label, size, "Downloaded rendition");
        Ok(RawStream {
            path: target,
            label: rendition.label.clone(),
            origin: StreamOrigin::Downloaded,
        })
    }
}
