//! Ingestion request and upload handle.

use std::path::PathBuf;

use bytes::Bytes;
use serde::Serialize;

use crate::{Error, Result};

/// How the source video reaches the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceMode {
    RemoteClip,
    DirectUpload,
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteClip => "remote-clip",
            Self::DirectUpload => "direct-upload",
        }
    }
}

impl std::fmt::Display for SourceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of an uploaded file.
#[derive(Debug, Clone)]
pub enum UploadBody {
    /// Small uploads held in memory.
    Bytes(Bytes),
    /// Uploads already spooled to disk by the caller.
    Path(PathBuf),
}

/// A file handed to the pipeline directly instead of a remote locator.
#[derive(Debug, Clone)]
pub struct UploadHandle {
    /// Original file name as supplied by the uploader.
    pub file_name: String,
    /// Declared MIME type, e.g. `video/mp4`.
    pub content_type: String,
    pub body: UploadBody,
}

impl UploadHandle {
    pub fn from_bytes(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            body: UploadBody::Bytes(body.into()),
        }
    }

    pub fn from_path(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            body: UploadBody::Path(path.into()),
        }
    }
}

/// A request to ingest one source video for an event.
///
/// Exactly one of `locator` and `upload` must be set.
#[derive(Debug, Clone)]
pub struct IngestionRequest {
    /// Owning event, allocated by the metadata store beforehand.
    pub event_id: i64,
    pub locator: Option<String>,
    pub upload: Option<UploadHandle>,
}

impl IngestionRequest {
    pub fn remote_clip(event_id: i64, locator: impl Into<String>) -> Self {
        Self {
            event_id,
            locator: Some(locator.into()),
            upload: None,
        }
    }

    pub fn direct_upload(event_id: i64, upload: UploadHandle) -> Self {
        Self {
            event_id,
            locator: None,
            upload: Some(upload),
        }
    }

    /// Determine the source mode, rejecting requests with both or neither input.
    pub fn mode(&self) -> Result<SourceMode> {
        let has_locator = self
            .locator
            .as_deref()
            .is_some_and(|l| !l.trim().is_empty());
        match (has_locator, self.upload.is_some()) {
            (true, false) => Ok(SourceMode::RemoteClip),
            (false, true) => Ok(SourceMode::DirectUpload),
            (true, true) => Err(Error::validation(
                "request carries both a remote locator and an upload",
            )),
            (false, false) => Err(Error::validation(
                "request carries neither a remote locator nor an upload",
            )),
        }
    }
}
