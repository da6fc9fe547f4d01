//! Quality label value object.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Height (3-4 digits) followed by `p`, optionally followed by a frame rate.
static LABEL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{3,4})p(\d{2,3})?").expect("label regex is valid"));

/// Label used for a stream whose quality is not known yet.
pub const SOURCE_LABEL: &str = "source";

/// Frame rates at or below this are not spelled out in labels.
const IMPLICIT_FPS: u32 = 30;

/// A quality label such as `1080p60`, `720p` or `source`.
///
/// Ordering is best-first: a label compares *less* than another when it
/// denotes higher quality (taller, then higher frame rate). Labels without a
/// parseable height sort after every parseable one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualityLabel(String);

impl QualityLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into().trim().to_string())
    }

    /// The placeholder label for uploads and unlabeled renditions.
    pub fn source() -> Self {
        Self(SOURCE_LABEL.to_string())
    }

    /// Build a label from probed dimensions, e.g. `(1080, Some(60.0))` → `1080p60`.
    pub fn from_dimensions(height: u32, fps: Option<f64>) -> Self {
        let fps = fps
            .filter(|f| f.is_finite() && *f > 0.0)
            .map(|f| f.round() as u32);
        match fps {
            Some(fps) if fps > IMPLICIT_FPS => Self(format!("{height}p{fps}")),
            _ => Self(format!("{height}p")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_source(&self) -> bool {
        self.0 == SOURCE_LABEL
    }

    /// Vertical resolution encoded in the label.
    pub fn height(&self) -> Option<u32> {
        LABEL_REGEX
            .captures(&self.0)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Frame rate encoded in the label; `720p` has none.
    pub fn fps(&self) -> Option<u32> {
        LABEL_REGEX
            .captures(&self.0)
            .and_then(|caps| caps.get(2))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Label reduced to `[A-Za-z0-9_-]` so it can be embedded in a storage key.
    pub fn key_safe(&self) -> String {
        let sanitized: String = self
            .0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if sanitized.is_empty() {
            SOURCE_LABEL.to_string()
        } else {
            sanitized
        }
    }

    /// Sort a slice best-first by the label each item carries.
    pub fn sort_best_first<T>(items: &mut [T], label: impl Fn(&T) -> &QualityLabel) {
        items.sort_by(|a, b| label(a).cmp(label(b)));
    }
}

impl Ord for QualityLabel {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.height(), other.height()) {
            (Some(a), Some(b)) => b
                .cmp(&a)
                .then_with(|| other.fps().unwrap_or(0).cmp(&self.fps().unwrap_or(0)))
                .then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for QualityLabel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QualityLabel {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
