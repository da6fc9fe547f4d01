//! Runtime configuration.
//!
//! Configuration is read once at the binary edge (`AppConfig::from_env`,
//! `StorageConfig::from_env`) and passed into the pipeline as plain values.
//! Nothing below `main` reads the environment.
//!
//! Supported env vars:
//! - `DATABASE_URL` (default `sqlite:clipvault.db?mode=rwc`)
//! - `CLIPVAULT_LOG_DIR` (default `logs`)
//! - `YTDLP_PATH`, `FFMPEG_PATH`, `FFPROBE_PATH` (default: found on `PATH`)
//! - `CLIPVAULT_MAX_WORKERS`, `CLIPVAULT_MAX_RETRIES`, `CLIPVAULT_RETRY_BACKOFF_MS`,
//!   `CLIPVAULT_ATTEMPT_TIMEOUT_SECS`, `CLIPVAULT_THUMBNAIL_FRACTION`, `CLIPVAULT_TEMP_DIR`
//! - `B2_ENDPOINT_URL`, `B2_REGION`, `B2_BUCKET`, `B2_ACCESS_KEY_ID`,
//!   `B2_SECRET_ACCESS_KEY`, `B2_BASE_URL`, `B2_FORCE_PATH_STYLE`

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::RetryPolicy;
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:clipvault.db?mode=rwc";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_ENDPOINT_URL: &str = "https://s3.us-west-004.backblazeb2.com";
pub const DEFAULT_REGION: &str = "us-west-004";
/// Published objects never change under the same key until re-ingestion.
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Paths of the external media tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: String,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
}

fn default_ytdlp_path() -> String {
    "yt-dlp".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: default_ytdlp_path(),
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

/// Bounds for one ingestion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Concurrent workers per fan-out stage.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Whole-attempt deadline in seconds.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Position of the thumbnail frame as a fraction of the clip duration.
    #[serde(default = "default_thumbnail_fraction")]
    pub thumbnail_fraction: f64,
    /// Parent directory for attempt workspaces; system temp dir when unset.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

fn default_max_workers() -> usize {
    3
}

fn default_attempt_timeout_secs() -> u64 {
    600
}

fn default_thumbnail_fraction() -> f64 {
    0.1
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            retry: RetryPolicy::default(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            thumbnail_fraction: default_thumbnail_fraction(),
            temp_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::config("max_workers must be at least 1"));
        }
        if self.attempt_timeout_secs == 0 {
            return Err(Error::config("attempt timeout must be positive"));
        }
        if !(self.thumbnail_fraction > 0.0 && self.thumbnail_fraction < 1.0) {
            return Err(Error::config("thumbnail fraction must be within (0, 1)"));
        }
        Ok(())
    }
}

/// S3-compatible object storage settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint_url: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Public URL prefix objects are served from, without trailing slash.
    pub public_base_url: String,
    pub force_path_style: bool,
    pub cache_control: String,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("public_base_url", &self.public_base_url)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| Error::config(format!("{key} must be set")))
        };

        let endpoint_url = get("B2_ENDPOINT_URL")
            .unwrap_or_else(|| DEFAULT_ENDPOINT_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        if !endpoint_url.starts_with("http://") && !endpoint_url.starts_with("https://") {
            return Err(Error::config("B2_ENDPOINT_URL must be an http(s) URL"));
        }

        let bucket = require("B2_BUCKET")?;
        let public_base_url = get("B2_BASE_URL")
            .unwrap_or_else(|| format!("{endpoint_url}/{bucket}"))
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            region: get("B2_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            access_key_id: require("B2_ACCESS_KEY_ID")?,
            secret_access_key: require("B2_SECRET_ACCESS_KEY")?,
            force_path_style: get("B2_FORCE_PATH_STYLE").is_none_or(|v| parse_bool(&v)),
            cache_control: DEFAULT_CACHE_CONTROL.to_string(),
            endpoint_url,
            bucket,
            public_base_url,
        })
    }
}

/// Everything the binary needs except storage credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: PathBuf,
    pub tools: ToolsConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut tools = ToolsConfig::default();
        if let Some(path) = get("YTDLP_PATH") {
            tools.ytdlp_path = path;
        }
        if let Some(path) = get("FFMPEG_PATH") {
            tools.ffmpeg_path = path;
        }
        if let Some(path) = get("FFPROBE_PATH") {
            tools.ffprobe_path = path;
        }

        let mut pipeline = PipelineConfig::default();
        if let Some(v) = get("CLIPVAULT_MAX_WORKERS") {
            pipeline.max_workers = parse_number("CLIPVAULT_MAX_WORKERS", &v)?;
        }
        if let Some(v) = get("CLIPVAULT_MAX_RETRIES") {
            pipeline.retry.max_retries = parse_number("CLIPVAULT_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("CLIPVAULT_RETRY_BACKOFF_MS") {
            pipeline.retry.initial_delay_ms = parse_number("CLIPVAULT_RETRY_BACKOFF_MS", &v)?;
        }
        if let Some(v) = get("CLIPVAULT_ATTEMPT_TIMEOUT_SECS") {
            pipeline.attempt_timeout_secs = parse_number("CLIPVAULT_ATTEMPT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("CLIPVAULT_THUMBNAIL_FRACTION") {
            pipeline.thumbnail_fraction = parse_number("CLIPVAULT_THUMBNAIL_FRACTION", &v)?;
        }
        pipeline.temp_dir = get("CLIPVAULT_TEMP_DIR").map(PathBuf::from);
        pipeline.validate()?;

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            log_dir: get("CLIPVAULT_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            tools,
            pipeline,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::config(format!("{key} has invalid value '{value}'")))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
