//! Remux processor: stream-copy into faststart MP4, then probe the result.

use std::path::Path;

use async_trait::async_trait;
use process_utils::{run_captured, tokio_command};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::traits::Remuxer;
use crate::domain::{NormalizedStream, RawStream};
use crate::storage::keys::mime_from_extension;
use crate::{Error, Result};

/// Canonical container of published variants.
const OUTPUT_EXTENSION: &str = "mp4";

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// What the probe tells us about a remuxed file.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MediaProbe {
    pub duration_secs: f64,
    pub height: Option<u32>,
    pub fps: Option<f64>,
}

/// Parse an ffprobe rational such as `60/1` or `30000/1001`.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn parse_seconds(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

fn parse_probe(stdout: &str) -> Result<MediaProbe> {
    let probe: ProbeOutput = serde_json::from_str(stdout)?;
    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let duration_secs = parse_seconds(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .or_else(|| parse_seconds(video.and_then(|v| v.duration.as_deref())))
        .unwrap_or(0.0);

    let fps = video.and_then(|v| {
        v.avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| v.r_frame_rate.as_deref().and_then(parse_frame_rate))
    });

    Ok(MediaProbe {
        duration_secs,
        height: video.and_then(|v| v.height).filter(|h| *h > 0),
        fps,
    })
}

/// [`Remuxer`] backed by ffmpeg and ffprobe.
pub struct FfmpegRemuxer {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegRemuxer {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    fn build_args(input: &Path, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-hide_banner", "-nostats", "-loglevel", "error"]
            .into_iter()
            .map(String::from)
            .collect();
        args.extend(["-i".to_string(), input.display().to_string()]);
        args.extend(["-map".to_string(), "0:v:0".to_string()]);
        args.extend(["-map".to_string(), "0:a:0?".to_string()]);
        args.extend(["-c".to_string(), "copy".to_string()]);
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        args.extend(["-f".to_string(), OUTPUT_EXTENSION.to_string()]);
        args.push(output.display().to_string());
        args
    }

    /// Run ffprobe on a file and read duration, height and frame rate.
    pub async fn probe(&self, path: &Path) -> Result<MediaProbe> {
        let mut cmd = tokio_command(&self.ffprobe_path);
        cmd.args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .env("LC_ALL", "C");

        let output = run_captured("ffprobe", &mut cmd)
            .await
            .map_err(|e| Error::Remux(e.to_string()))?;
        parse_probe(&output.stdout)
            .map_err(|e| Error::Remux(format!("unreadable ffprobe output: {e}")))
    }
}

impl Default for FfmpegRemuxer {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    async fn remux(&self, input: &RawStream, output_dir: &Path) -> Result<NormalizedStream> {
        let start = std::time::Instant::now();
        let output = output_dir.join(format!("{}.{OUTPUT_EXTENSION}", input.label.key_safe()));
        if output == input.path {
            return Err(Error::Remux(format!(
                "remux output would overwrite its input: {}",
                input.path.display()
            )));
        }

        let args = Self::build_args(&input.path, &output);
        debug!("FFmpeg args: {:?}", args);

        let mut cmd = tokio_command(&self.ffmpeg_path);
        cmd.args(&args).env("LC_ALL", "C");
        run_captured("ffmpeg", &mut cmd)
            .await
            .map_err(|e| Error::Remux(format!("{} ({}): {e}", input.label, input.path.display())))?;

        let size_bytes = tokio::fs::metadata(&output).await?.len();
        if size_bytes == 0 {
            return Err(Error::Remux(format!("{}: remuxed file is empty", input.label)));
        }

        let probe = self.probe(&output).await?;
        if probe.duration_secs <= 0.0 {
            warn!(quality = %input.label, "ffprobe reported no duration");
        }

        info!(
            quality = %input.label,
            size = size_bytes,
            duration = probe.duration_secs,
            "Remuxed in {:.2}s",
            start.elapsed().as_secs_f64()
        );

        Ok(NormalizedStream {
            path: output,
            label: input.label.clone(),
            mime: mime_from_extension(OUTPUT_EXTENSION).to_string(),
            size_bytes,
            duration_secs: probe.duration_secs,
            height: probe.height,
            fps: probe.fps,
        })
    }
}
