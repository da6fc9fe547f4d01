//! Per-artifact failures and the overall ingestion result.

use serde::Serialize;

use super::{PublishedVariant, QualityLabel, ThumbnailArtifact};
use crate::Error;

/// Pipeline stage an artifact failure was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Download,
    Remux,
    Thumbnail,
    Upload,
    ZeroVariants,
    MetadataCommit,
    Cleanup,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "DownloadError",
            Self::Remux => "RemuxError",
            Self::Thumbnail => "ThumbnailError",
            Self::Upload => "UploadError",
            Self::ZeroVariants => "ZeroVariantError",
            Self::MetadataCommit => "MetadataCommitError",
            Self::Cleanup => "CleanupError",
        }
    }
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded, non-propagated failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactFailure {
    pub stage: FailureStage,
    pub quality: Option<QualityLabel>,
    pub message: String,
}

impl ArtifactFailure {
    pub fn new(stage: FailureStage, quality: Option<QualityLabel>, message: impl Into<String>) -> Self {
        Self {
            stage,
            quality,
            message: message.into(),
        }
    }

    pub fn from_error(stage: FailureStage, quality: Option<QualityLabel>, err: &Error) -> Self {
        Self::new(stage, quality, err.to_string())
    }
}

impl std::fmt::Display for ArtifactFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.quality {
            Some(q) => write!(f, "{} [{}]: {}", self.stage, q, self.message),
            None => write!(f, "{}: {}", self.stage, self.message),
        }
    }
}

/// Terminal status of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Committed,
    Aborted,
}

/// What the caller gets back from an ingestion attempt.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionResult {
    pub event_id: i64,
    pub status: IngestStatus,
    /// Best quality first; empty only when aborted.
    pub variants: Vec<PublishedVariant>,
    pub thumbnail: Option<ThumbnailArtifact>,
    pub failures: Vec<ArtifactFailure>,
    pub summary: String,
    pub succeeded: Vec<QualityLabel>,
    pub failed: Vec<QualityLabel>,
}

impl IngestionResult {
    /// Assemble a result and derive the label lists and summary.
    ///
    /// On abort, variants passed in have been rolled back: their labels are
    /// reported as failed and the variant list is emptied.
    pub fn new(
        event_id: i64,
        status: IngestStatus,
        mut variants: Vec<PublishedVariant>,
        thumbnail: Option<ThumbnailArtifact>,
        failures: Vec<ArtifactFailure>,
    ) -> Self {
        let succeeded: Vec<QualityLabel> = match status {
            IngestStatus::Committed => variants.iter().map(|v| v.quality_label.clone()).collect(),
            IngestStatus::Aborted => Vec::new(),
        };

        let mut failed: Vec<QualityLabel> = failures
            .iter()
            .filter_map(|f| f.quality.clone())
            .filter(|q| !succeeded.contains(q))
            .collect();
        if status == IngestStatus::Aborted {
            failed.extend(variants.drain(..).map(|v| v.quality_label));
        }
        failed.sort();
        failed.dedup();

        let summary = summarize(status, &succeeded, &failures);

        Self {
            event_id,
            status,
            variants,
            thumbnail,
            failures,
            summary,
            succeeded,
            failed,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.status == IngestStatus::Committed
    }

    /// URL of the best variant, the event's primary video.
    pub fn video_url(&self) -> Option<&str> {
        self.variants.first().map(|v| v.public_url.as_str())
    }
}

fn summarize(status: IngestStatus, succeeded: &[QualityLabel], failures: &[ArtifactFailure]) -> String {
    let mut summary = match status {
        IngestStatus::Committed => {
            let labels: Vec<&str> = succeeded.iter().map(QualityLabel::as_str).collect();
            format!("committed {} variant(s): {}", labels.len(), labels.join(", "))
        }
        IngestStatus::Aborted => "aborted".to_string(),
    };

    if !failures.is_empty() {
        let details: Vec<String> = failures.iter().map(ToString::to_string).collect();
        summary.push_str(&format!("; {} failure(s): {}", failures.len(), details.join("; ")));
    }

    summary
}
