//! Ingestion orchestrator.
//!
//! Drives one attempt through the state machine:
//!
//! ```text
//! Resolving -> Fetching (remote only) -> Remuxing -> Thumbnailing -> Publishing
//!           -> Deciding -> Committed | Aborted
//! ```
//!
//! Everything from resolving to deciding runs under the attempt deadline and
//! the pipeline's cancellation token. The upload ledger and failure list live
//! outside the timed future, so a timeout or cancellation still knows what to
//! delete.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::MetadataSink;
use super::processors::{
    ClipDownloader, Remuxer, ThumbnailExtractor, select_thumbnail_source, thumbnail_offset,
};
use super::resolver::{self, IngestionPlan};
use super::worker_pool::WorkerPool;
use super::workspace::Workspace;
use crate::config::PipelineConfig;
use crate::domain::{
    ArtifactFailure, ClipUrl, EventCommit, FailureStage, IngestState, IngestStatus,
    IngestionRequest, IngestionResult, NormalizedStream, PublishedVariant, QualityLabel,
    RawStream, StateTracker, ThumbnailArtifact,
};
use crate::storage::{StoragePublisher, UploadLedger};
use crate::utils::retry::retry_transient;
use crate::{Error, Result};

/// Mutable bookkeeping of one attempt.
struct Attempt {
    event_id: i64,
    state: Mutex<StateTracker>,
    failures: Mutex<Vec<ArtifactFailure>>,
    ledger: UploadLedger,
}

impl Attempt {
    fn new(event_id: i64) -> Self {
        Self {
            event_id,
            state: Mutex::new(StateTracker::new()),
            failures: Mutex::new(Vec::new()),
            ledger: UploadLedger::new(),
        }
    }

    fn advance(&self, next: IngestState) -> Result<()> {
        let mut state = self.state.lock();
        let from = state.current();
        state.transition(next)?;
        debug!(event_id = self.event_id, from = %from, to = %next, "State transition");
        Ok(())
    }

    /// Move to `Aborted` unless the attempt already reached a terminal state.
    fn mark_aborted(&self) {
        let mut state = self.state.lock();
        if !state.current().is_terminal() {
            let _ = state.transition(IngestState::Aborted);
        }
    }

    fn current(&self) -> IngestState {
        self.state.lock().current()
    }

    fn record(&self, failure: ArtifactFailure) {
        warn!(event_id = self.event_id, failure = %failure, "Artifact failed");
        self.failures.lock().push(failure);
    }

    fn take_failures(&self) -> Vec<ArtifactFailure> {
        std::mem::take(&mut *self.failures.lock())
    }
}

/// What the timed stages hand to the decision.
struct Staged {
    variants: Vec<PublishedVariant>,
    thumbnail: Option<ThumbnailArtifact>,
    original_clip_url: Option<String>,
}

/// The ingestion pipeline with its collaborators.
pub struct IngestPipeline {
    config: PipelineConfig,
    downloader: Arc<dyn ClipDownloader>,
    remuxer: Arc<dyn Remuxer>,
    thumbnailer: Arc<dyn ThumbnailExtractor>,
    publisher: StoragePublisher,
    sink: Arc<dyn MetadataSink>,
    pool: WorkerPool,
    cancellation_token: CancellationToken,
}

impl IngestPipeline {
    pub fn new(
        config: PipelineConfig,
        downloader: Arc<dyn ClipDownloader>,
        remuxer: Arc<dyn Remuxer>,
        thumbnailer: Arc<dyn ThumbnailExtractor>,
        publisher: StoragePublisher,
        sink: Arc<dyn MetadataSink>,
    ) -> Self {
        let pool = WorkerPool::new(config.max_workers);
        Self {
            config,
            downloader,
            remuxer,
            thumbnailer,
            publisher,
            sink,
            pool,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Abort in-flight attempts (with cleanup) when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn publisher(&self) -> &StoragePublisher {
        &self.publisher
    }

    /// Run one ingestion attempt.
    ///
    /// Returns `Err` for invalid requests, timeouts and cancellation; every
    /// other failure is reported inside an `Aborted` result after cleanup.
    pub async fn ingest(&self, request: IngestionRequest) -> Result<IngestionResult> {
        let span = info_span!("ingest", event_id = request.event_id);
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: IngestionRequest) -> Result<IngestionResult> {
        let mode = resolver::validate_request(&request)?;
        info!(mode = %mode, "Starting ingestion");

        let mut workspace = Workspace::create(self.config.temp_dir.as_deref())?;
        let attempt = Attempt::new(request.event_id);
        let deadline = self.config.attempt_timeout();

        let outcome = tokio::select! {
            result = timeout(deadline, self.run_stages(&request, &workspace, &attempt)) => {
                result.unwrap_or(Err(Error::Timeout(deadline)))
            }
            _ = self.cancellation_token.cancelled() => Err(Error::Cancelled),
        };

        let staged = match outcome {
            Ok(staged) => staged,
            Err(e) => {
                match &e {
                    Error::Timeout(_) | Error::Cancelled => {
                        warn!(state = %attempt.current(), error = %e, "Ingestion interrupted")
                    }
                    _ => error!(state = %attempt.current(), error = %e, "Ingestion failed"),
                }
                self.abort(&attempt, &mut workspace).await;
                return Err(e);
            }
        };

        let Staged {
            variants,
            thumbnail,
            original_clip_url,
        } = staged;

        let commit = match EventCommit::new(
            attempt.event_id,
            variants.clone(),
            original_clip_url,
            thumbnail.as_ref().map(|t| t.public_url.clone()),
        ) {
            Ok(commit) => commit,
            Err(e) => {
                attempt.record(ArtifactFailure::from_error(FailureStage::ZeroVariants, None, &e));
                self.abort(&attempt, &mut workspace).await;
                return Ok(self.finish(&attempt, IngestStatus::Aborted, Vec::new(), None));
            }
        };

        if let Err(e) = self.sink.commit_ingestion(&commit).await {
            let failure = match e {
                Error::MetadataCommit(_) => e,
                other => Error::MetadataCommit(other.to_string()),
            };
            attempt.record(ArtifactFailure::from_error(FailureStage::MetadataCommit, None, &failure));
            self.abort(&attempt, &mut workspace).await;
            return Ok(self.finish(&attempt, IngestStatus::Aborted, variants, None));
        }

        attempt.advance(IngestState::Committed)?;
        workspace.close().await;
        Ok(self.finish(&attempt, IngestStatus::Committed, variants, thumbnail))
    }

    async fn run_stages(
        &self,
        request: &IngestionRequest,
        workspace: &Workspace,
        attempt: &Attempt,
    ) -> Result<Staged> {
        let plan = resolver::resolve(request, workspace).await?;

        let (raw, original_clip_url) = match plan {
            IngestionPlan::RemoteClip { locator } => {
                attempt.advance(IngestState::Fetching)?;
                let raw = self.fetch(&locator, workspace, attempt).await?;
                (raw, Some(locator.as_str().to_string()))
            }
            IngestionPlan::DirectUpload { stream } => (vec![stream], None),
        };

        attempt.advance(IngestState::Remuxing)?;
        let mut streams = self.remux_all(raw, workspace, attempt).await?;
        if streams.is_empty() {
            attempt.advance(IngestState::Deciding)?;
            return Ok(Staged {
                variants: Vec::new(),
                thumbnail: None,
                original_clip_url,
            });
        }
        QualityLabel::sort_best_first(&mut streams, |s| &s.label);

        attempt.advance(IngestState::Thumbnailing)?;
        attempt.advance(IngestState::Publishing)?;
        let (thumbnail, mut variants) = tokio::join!(
            self.thumbnail(&streams, workspace, attempt),
            self.publish_all(&streams, attempt)
        );

        attempt.advance(IngestState::Deciding)?;
        QualityLabel::sort_best_first(&mut variants, |v| &v.quality_label);
        Ok(Staged {
            variants,
            thumbnail,
            original_clip_url,
        })
    }

    async fn fetch(
        &self,
        locator: &ClipUrl,
        workspace: &Workspace,
        attempt: &Attempt,
    ) -> Result<Vec<RawStream>> {
        let retry = &self.config.retry;
        let info = match retry_transient("probe", retry, || self.downloader.probe(locator)).await {
            Ok(info) => info,
            Err(e) => {
                attempt.record(ArtifactFailure::from_error(FailureStage::Download, None, &e));
                return Ok(Vec::new());
            }
        };
        if info.renditions.is_empty() {
            warn!(clip = %locator.slug(), "Clip has no downloadable renditions");
            return Ok(Vec::new());
        }

        let dir = workspace.subdir("raw").await?;
        let labels: Vec<QualityLabel> = info.renditions.iter().map(|r| r.label.clone()).collect();
        let results = self
            .pool
            .scatter("download", info.renditions, |rendition| {
                let downloader = self.downloader.clone();
                let locator = locator.clone();
                let dir = dir.clone();
                let retry = retry.clone();
                async move {
                    retry_transient("download", &retry, || {
                        downloader.download(&locator, &rendition, &dir)
                    })
                    .await
                }
            })
            .await;

        Ok(gather(FailureStage::Download, labels, results, attempt))
    }

    async fn remux_all(
        &self,
        raw: Vec<RawStream>,
        workspace: &Workspace,
        attempt: &Attempt,
    ) -> Result<Vec<NormalizedStream>> {
        if raw.is_empty() {
            return Ok(Vec::new());
        }

        let dir = workspace.subdir("remux").await?;
        let labels: Vec<QualityLabel> = raw.iter().map(|s| s.label.clone()).collect();
        let retry = &self.config.retry;
        let results = self
            .pool
            .scatter("remux", raw, |stream| {
                let remuxer = self.remuxer.clone();
                let dir = dir.clone();
                let retry = retry.clone();
                async move { retry_transient("remux", &retry, || remuxer.remux(&stream, &dir)).await }
            })
            .await;

        let mut seen = HashSet::new();
        let streams = gather(FailureStage::Remux, labels, results, attempt)
            .into_iter()
            .map(relabel_source)
            .filter(|s| {
                let fresh = seen.insert(s.label.clone());
                if !fresh {
                    warn!(quality = %s.label, "Dropping duplicate quality label");
                }
                fresh
            })
            .collect();
        Ok(streams)
    }

    async fn thumbnail(
        &self,
        streams: &[NormalizedStream],
        workspace: &Workspace,
        attempt: &Attempt,
    ) -> Option<ThumbnailArtifact> {
        let source = select_thumbnail_source(streams)?;
        let at_secs = thumbnail_offset(source.duration_secs, source.fps, self.config.thumbnail_fraction);
        let output = workspace.path().join("thumbnail.jpg");

        let path = match retry_transient("thumbnail", &self.config.retry, || {
            self.thumbnailer.extract(source, at_secs, &output)
        })
        .await
        {
            Ok(path) => path,
            Err(e) => {
                attempt.record(ArtifactFailure::from_error(FailureStage::Thumbnail, None, &e));
                return None;
            }
        };

        match self
            .publisher
            .publish_thumbnail(attempt.event_id, &path, &attempt.ledger)
            .await
        {
            Ok(thumbnail) => Some(thumbnail),
            Err(e) => {
                attempt.record(ArtifactFailure::from_error(FailureStage::Thumbnail, None, &e));
                None
            }
        }
    }

    async fn publish_all(
        &self,
        streams: &[NormalizedStream],
        attempt: &Attempt,
    ) -> Vec<PublishedVariant> {
        let labels: Vec<QualityLabel> = streams.iter().map(|s| s.label.clone()).collect();
        let results = self
            .pool
            .scatter("upload", streams.to_vec(), |stream| {
                let publisher = self.publisher.clone();
                let ledger = attempt.ledger.clone();
                let event_id = attempt.event_id;
                async move { publisher.publish_variant(event_id, &stream, &ledger).await }
            })
            .await;

        gather(FailureStage::Upload, labels, results, attempt)
    }

    /// Compensating path shared by every abort: terminal state, workspace
    /// teardown, then deletion of everything the attempt uploaded.
    async fn abort(&self, attempt: &Attempt, workspace: &mut Workspace) {
        attempt.mark_aborted();
        workspace.close().await;

        if attempt.ledger.is_empty() {
            return;
        }
        if let Err(e) = self.publisher.rollback(&attempt.ledger).await {
            error!(error = %e, remaining = attempt.ledger.len(), "Compensating cleanup incomplete");
            attempt.record(ArtifactFailure::from_error(FailureStage::Cleanup, None, &e));
        }
    }

    fn finish(
        &self,
        attempt: &Attempt,
        status: IngestStatus,
        variants: Vec<PublishedVariant>,
        thumbnail: Option<ThumbnailArtifact>,
    ) -> IngestionResult {
        let result = IngestionResult::new(
            attempt.event_id,
            status,
            variants,
            thumbnail,
            attempt.take_failures(),
        );
        match result.status {
            IngestStatus::Committed => info!(summary = %result.summary, "Ingestion committed"),
            IngestStatus::Aborted => warn!(summary = %result.summary, "Ingestion aborted"),
        }
        result
    }
}

/// Keep successful results and record the failures, keyed by quality label.
fn gather<R>(
    stage: FailureStage,
    labels: Vec<QualityLabel>,
    results: Vec<Result<R>>,
    attempt: &Attempt,
) -> Vec<R> {
    labels
        .into_iter()
        .zip(results)
        .filter_map(|(label, result)| match result {
            Ok(value) => Some(value),
            Err(e) => {
                attempt.record(ArtifactFailure::from_error(stage, Some(label), &e));
                None
            }
        })
        .collect()
}

/// Uploads arrive labeled `source`; name them after the probed height.
fn relabel_source(mut stream: NormalizedStream) -> NormalizedStream {
    if stream.label.is_source()
        && let Some(height) = stream.height
    {
        let label = QualityLabel::from_dimensions(height, None);
        info!(from = %stream.label, to = %label, "Relabeled stream from probe");
        stream.label = label;
    }
    stream
}
