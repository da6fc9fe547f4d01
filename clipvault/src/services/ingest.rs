//! Administrative entry point for ingestion and event maintenance.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ToolsConfig;
use crate::database::models::{EventDbModel, EventVideoDbModel, NewEvent};
use crate::database::repositories::EventRepository;
use crate::domain::{IngestionRequest, IngestionResult, UploadHandle};
use crate::pipeline::IngestPipeline;
use crate::pipeline::resolver::validate_request;
use crate::storage::keys::event_prefix;
use crate::Result;

/// Which event an ingestion belongs to.
#[derive(Debug, Clone)]
pub enum EventTarget {
    /// An event row that already exists (re-ingestion overwrites it).
    Existing(i64),
    /// Create a draft row for these fields; it is discarded if ingestion aborts.
    New(NewEvent),
}

/// Where the video comes from. Exactly one field must be set.
#[derive(Debug, Clone, Default)]
pub struct IngestSource {
    pub locator: Option<String>,
    pub upload: Option<UploadHandle>,
}

impl IngestSource {
    pub fn remote(locator: impl Into<String>) -> Self {
        Self {
            locator: Some(locator.into()),
            upload: None,
        }
    }

    pub fn upload(upload: UploadHandle) -> Self {
        Self {
            locator: None,
            upload: Some(upload),
        }
    }

    fn into_request(self, event_id: i64) -> IngestionRequest {
        IngestionRequest {
            event_id,
            locator: self.locator,
            upload: self.upload,
        }
    }
}

/// An event with its variant rows, best quality first.
#[derive(Debug, Clone, Serialize)]
pub struct EventDetails {
    pub event: EventDbModel,
    pub variants: Vec<EventVideoDbModel>,
}

/// Outcome of deleting an event.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub event_id: i64,
    pub objects_deleted: usize,
    pub row_deleted: bool,
}

/// Availability of one external tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub name: &'static str,
    pub path: String,
    pub version: Option<String>,
}

/// Result of `check`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub tools: Vec<ToolStatus>,
    pub storage_ok: bool,
    pub storage_error: Option<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.storage_ok && self.tools.iter().all(|t| t.version.is_some())
    }
}

/// Service wrapping the pipeline with event bookkeeping.
pub struct IngestService<R: EventRepository> {
    repo: Arc<R>,
    pipeline: Arc<IngestPipeline>,
    tools: ToolsConfig,
}

impl<R: EventRepository> IngestService<R> {
    pub fn new(repo: Arc<R>, pipeline: Arc<IngestPipeline>, tools: ToolsConfig) -> Self {
        Self {
            repo,
            pipeline,
            tools,
        }
    }

    /// Ingest a video for an event.
    ///
    /// Bad requests are rejected before any row is created. For a new event
    /// the draft row is removed again when the attempt does not commit. After
    /// a successful re-ingestion, objects of variants that are no longer
    /// produced are deleted.
    ///
    /// Object keys are deterministic per event, so an aborted re-ingestion of
    /// a published event rolls back the objects its row still links to. The
    /// row keeps its `video_url` and `thumbnail_url` until a later attempt
    /// commits or the event is deleted.
    pub async fn ingest(&self, target: EventTarget, source: IngestSource) -> Result<IngestionResult> {
        let mut request = source.into_request(0);
        validate_request(&request)?;

        let (event_id, is_draft, was_published, previous_keys) = match target {
            EventTarget::Existing(id) => {
                let event = self.repo.get_event(id).await?;
                let keys: Vec<String> = self
                    .repo
                    .list_variants(id)
                    .await?
                    .into_iter()
                    .map(|row| row.storage_key)
                    .collect();
                (id, false, event.published, keys)
            }
            EventTarget::New(fields) => {
                let id = self.repo.create_draft(&fields).await?;
                info!(event_id = id, title = %fields.title, "Created draft event");
                (id, true, false, Vec::new())
            }
        };
        request.event_id = event_id;

        let outcome = self.pipeline.ingest(request).await;
        let committed = matches!(&outcome, Ok(result) if result.is_committed());

        if !committed && is_draft {
            match self.repo.discard_draft(event_id).await {
                Ok(true) => info!(event_id, "Discarded draft event"),
                Ok(false) => {}
                Err(e) => warn!(event_id, error = %e, "Failed to discard draft event"),
            }
        }

        if !committed && was_published {
            warn!(
                event_id,
                "Re-ingestion of a published event did not commit; its media URLs no longer resolve"
            );
        }

        if let Ok(result) = &outcome
            && committed
        {
            self.delete_stale_variants(event_id, previous_keys, result).await;
        }

        outcome
    }

    async fn delete_stale_variants(
        &self,
        event_id: i64,
        previous_keys: Vec<String>,
        result: &IngestionResult,
    ) {
        let current: HashSet<&str> = result
            .variants
            .iter()
            .map(|v| v.storage_key.as_str())
            .collect();
        let stale: Vec<String> = previous_keys
            .into_iter()
            .filter(|key| !current.contains(key.as_str()))
            .collect();
        if stale.is_empty() {
            return;
        }

        match self.pipeline.publisher().delete_keys(&stale).await {
            Ok(count) => info!(event_id, count, "Deleted stale variant objects"),
            Err(e) => warn!(event_id, error = %e, "Failed to delete stale variant objects"),
        }
    }

    pub async fn show(&self, event_id: i64) -> Result<EventDetails> {
        let event = self.repo.get_event(event_id).await?;
        let variants = self.repo.list_variants(event_id).await?;
        Ok(EventDetails { event, variants })
    }

    /// Delete every stored object of an event, then its row.
    ///
    /// Objects go first: if the purge fails the row stays, and the command
    /// can be repeated.
    pub async fn delete_event(&self, event_id: i64) -> Result<DeleteReport> {
        self.repo.get_event(event_id).await?;
        let objects_deleted = self
            .pipeline
            .publisher()
            .purge_prefix(&event_prefix(event_id))
            .await?;
        let row_deleted = self.repo.delete_event(event_id).await?;
        info!(event_id, objects_deleted, "Deleted event");
        Ok(DeleteReport {
            event_id,
            objects_deleted,
            row_deleted,
        })
    }

    /// Probe the external tools and the object store.
    pub async fn check(&self) -> HealthReport {
        let probes = [
            ("yt-dlp", self.tools.ytdlp_path.clone(), "--version"),
            ("ffmpeg", self.tools.ffmpeg_path.clone(), "-version"),
            ("ffprobe", self.tools.ffprobe_path.clone(), "-version"),
        ];

        let mut tools = Vec::with_capacity(probes.len());
        for (name, path, arg) in probes {
            let probe_path = path.clone();
            let version = tokio::task::spawn_blocking(move || {
                process_utils::tool_version(&probe_path, arg)
            })
            .await
            .unwrap_or_else(|e| {
                warn!(tool = name, error = %e, "Tool probe task failed");
                None
            });
            if version.is_none() {
                warn!(tool = name, path = %path, "Tool not available");
            }
            tools.push(ToolStatus {
                name,
                path,
                version,
            });
        }

        let storage = self.pipeline.publisher().store().check().await;
        if let Err(e) = &storage {
            warn!(error = %e, "Object store not reachable");
        }

        HealthReport {
            tools,
            storage_ok: storage.is_ok(),
            storage_error: storage.err().map(|e| e.to_string()),
        }
    }
}
