//! Remote clip locator value object.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::Error;

/// `https://clips.twitch.tv/<slug>` and `https://clips.twitch.tv/embed?clip=<slug>`.
static CLIPS_HOST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://clips\.twitch\.tv/(?:embed\?clip=)?([A-Za-z0-9_-]+)/?(?:[?#].*)?$")
        .expect("clips host regex is valid")
});

/// `https://www.twitch.tv/<channel>/clip/<slug>`, also on `m.` and the bare domain.
static CHANNEL_CLIP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(?:www\.|m\.)?twitch\.tv/[A-Za-z0-9_]+/clip/([A-Za-z0-9_-]+)/?(?:[?#].*)?$",
    )
    .expect("channel clip regex is valid")
});

/// A validated locator for a remote short clip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClipUrl {
    url: String,
    slug: String,
}

impl ClipUrl {
    /// Validate and normalize a remote clip locator.
    pub fn new(url: impl AsRef<str>) -> Result<Self, Error> {
        let raw = url.as_ref().trim();
        if raw.is_empty() {
            return Err(Error::validation("clip URL cannot be empty"));
        }
        if raw.contains(char::is_whitespace) {
            return Err(Error::validation("clip URL cannot contain whitespace"));
        }

        let parsed =
            Url::parse(raw).map_err(|e| Error::validation(format!("malformed clip URL: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::validation("clip URL must use http or https"));
        }

        let normalized = Self::normalize(&parsed);
        let slug = Self::extract_slug(&normalized).ok_or_else(|| {
            Error::validation(format!("unsupported clip origin: {normalized}"))
        })?;

        Ok(Self {
            url: normalized,
            slug,
        })
    }

    /// The normalized locator.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// The clip slug (last path segment identifying the clip).
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Lowercase scheme and host, drop fragment and trailing slash.
    fn normalize(url: &Url) -> String {
        let mut url = url.clone();
        url.set_fragment(None);
        // `Url` already lowercases scheme and host.
        let s = url.to_string();
        match s.strip_suffix('/') {
            Some(trimmed) if url.query().is_none() => trimmed.to_string(),
            _ => s,
        }
    }

    fn extract_slug(url: &str) -> Option<String> {
        CLIPS_HOST_REGEX
            .captures(url)
            .or_else(|| CHANNEL_CLIP_REGEX.captures(url))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

impl std::fmt::Display for ClipUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

impl AsRef<str> for ClipUrl {
    fn as_ref(&self) -> &str {
        &self.url
    }
}
