//! Source resolution: turn an ingestion request into a typed plan.

use std::path::Path;

use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use super::workspace::Workspace;
use crate::domain::{
    ClipUrl, IngestionRequest, QualityLabel, RawStream, SourceMode, StreamOrigin, UploadBody,
    UploadHandle,
};
use crate::utils::filename::{sanitize_upload_name, upload_extension};
use crate::{Error, Result};

/// Content types accepted for direct uploads, with the extension used for the
/// materialized file.
const ACCEPTED_CONTENT_TYPES: &[(&str, &str)] = &[
    ("video/mp4", "mp4"),
    ("video/quicktime", "mov"),
    ("video/x-matroska", "mkv"),
    ("video/webm", "webm"),
    ("video/x-flv", "flv"),
    ("video/mp2t", "ts"),
];

/// MPEG-TS packet size; the sync byte repeats at this stride.
const TS_PACKET_LEN: usize = 188;

/// Bytes read from an upload to sniff its container.
const SNIFF_LEN: usize = 2 * TS_PACKET_LEN;

/// What an attempt will work on.
#[derive(Debug, Clone)]
pub enum IngestionPlan {
    /// Fetch renditions of a remote clip.
    RemoteClip { locator: ClipUrl },
    /// A single uploaded stream, already in the workspace.
    DirectUpload { stream: RawStream },
}

impl IngestionPlan {
    pub fn mode(&self) -> SourceMode {
        match self {
            Self::RemoteClip { .. } => SourceMode::RemoteClip,
            Self::DirectUpload { .. } => SourceMode::DirectUpload,
        }
    }
}

/// Container families recognized from leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerSignature {
    IsoBmff,
    Ebml,
    Flv,
    MpegTs,
}

/// Identify the container from the first bytes of a file.
pub fn sniff_container(head: &[u8]) -> Option<ContainerSignature> {
    if head.len() >= 8 && matches!(&head[4..8], b"ftyp" | b"moov" | b"mdat" | b"wide" | b"free") {
        return Some(ContainerSignature::IsoBmff);
    }
    if head.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some(ContainerSignature::Ebml);
    }
    if head.starts_with(b"FLV") {
        return Some(ContainerSignature::Flv);
    }
    if head.first() == Some(&0x47) && head.get(TS_PACKET_LEN) == Some(&0x47) {
        return Some(ContainerSignature::MpegTs);
    }
    None
}

/// Normalize a declared content type (`Video/MP4; codecs=...` -> `video/mp4`)
/// and return the extension for the accepted type.
fn accepted_extension(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    ACCEPTED_CONTENT_TYPES
        .iter()
        .find(|(ty, _)| *ty == essence)
        .map(|(_, ext)| *ext)
}

/// Validate a request without touching the filesystem.
///
/// Cheap checks that let callers reject bad requests before any draft or
/// workspace exists.
pub fn validate_request(request: &IngestionRequest) -> Result<SourceMode> {
    let mode = request.mode()?;
    match mode {
        SourceMode::RemoteClip => {
            ClipUrl::new(request.locator.as_deref().unwrap_or_default())?;
        }
        SourceMode::DirectUpload => {
            if let Some(upload) = &request.upload {
                accepted_extension(&upload.content_type).ok_or_else(|| {
                    Error::validation(format!(
                        "unsupported upload content type: {}",
                        upload.content_type
                    ))
                })?;
            }
        }
    }
    Ok(mode)
}

/// Resolve a request into a plan, materializing uploads into `workspace`.
pub async fn resolve(request: &IngestionRequest, workspace: &Workspace) -> Result<IngestionPlan> {
    match validate_request(request)? {
        SourceMode::RemoteClip => {
            let locator = ClipUrl::new(request.locator.as_deref().unwrap_or_default())?;
            info!(event_id = request.event_id, clip = %locator.slug(), "Resolved remote clip");
            Ok(IngestionPlan::RemoteClip { locator })
        }
        SourceMode::DirectUpload => {
            let upload = request
                .upload
                .as_ref()
                .ok_or_else(|| Error::validation("direct upload without a file"))?;
            let stream = materialize_upload(upload, workspace).await?;
            info!(
                event_id = request.event_id,
                file = %upload.file_name,
                path = %stream.path.display(),
                "Resolved direct upload"
            );
            Ok(IngestionPlan::DirectUpload { stream })
        }
    }
}

async fn materialize_upload(upload: &UploadHandle, workspace: &Workspace) -> Result<RawStream> {
    let declared_ext = accepted_extension(&upload.content_type).ok_or_else(|| {
        Error::validation(format!("unsupported upload content type: {}", upload.content_type))
    })?;
    let ext = upload_extension(&upload.file_name).unwrap_or_else(|| declared_ext.to_string());

    let dir = workspace.subdir("upload").await?;
    let stem = sanitize_upload_name(&upload.file_name);
    let stem = stem.rsplit_once('.').map_or(stem.as_str(), |(s, _)| s);
    let target = dir.join(format!("{stem}.{ext}"));

    match &upload.body {
        UploadBody::Bytes(bytes) => {
            check_head(&upload.file_name, bytes.len() as u64, &bytes[..bytes.len().min(SNIFF_LEN)])?;
            tokio::fs::write(&target, bytes).await?;
        }
        UploadBody::Path(source) => {
            let (size, head) = read_head(source).await?;
            check_head(&upload.file_name, size, &head)?;
            tokio::fs::copy(source, &target).await?;
        }
    }

    debug!(path = %target.display(), "Materialized upload");
    Ok(RawStream {
        path: target,
        label: QualityLabel::source(),
        origin: StreamOrigin::Uploaded,
    })
}

async fn read_head(path: &Path) -> Result<(u64, Vec<u8>)> {
    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        Error::validation(format!("upload file {} is not readable: {e}", path.display()))
    })?;
    let size = file.metadata().await?.len();
    let mut head = Vec::with_capacity(SNIFF_LEN);
    (&mut file).take(SNIFF_LEN as u64).read_to_end(&mut head).await?;
    Ok((size, head))
}

fn check_head(file_name: &str, size: u64, head: &[u8]) -> Result<()> {
    if size == 0 {
        return Err(Error::validation(format!("upload {file_name} is empty")));
    }
    if sniff_container(head).is_none() {
        return Err(Error::validation(format!(
            "upload {file_name} is not a recognized video container"
        )));
    }
    Ok(())
}
