//! End-to-end tests for the ingestion pipeline.
//!
//! The media tools and the bucket are replaced by in-process fakes; metadata
//! goes to a real SQLite database (in-memory) with the production schema.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use clipvault::config::{PipelineConfig, ToolsConfig};
use clipvault::database::models::NewEvent;
use clipvault::database::repositories::{EventRepository, SqlxEventRepository};
use clipvault::database::{init_pool_with_size, run_migrations};
use clipvault::domain::{
    ClipUrl, EventCommit, FailureStage, IngestStatus, IngestionRequest, NormalizedStream,
    QualityLabel, RawStream, RetryPolicy, StreamOrigin, UploadHandle,
};
use clipvault::pipeline::{
    ClipDownloader, ClipInfo, IngestPipeline, MetadataSink, Remuxer, Rendition,
    ThumbnailExtractor,
};
use clipvault::services::{EventTarget, IngestService, IngestSource};
use clipvault::storage::{ObjectStore, ObjectVersion, StoragePublisher};
use clipvault::{Error, Result};

const CLIP: &str = "https://clips.twitch.tv/AwkwardHelplessSalamanderSwiftRage";
const CDN: &str = "https://cdn.example.com";

/// `ftyp` box header of an ISO-BMFF file.
fn mp4_head() -> Vec<u8> {
    let mut head = vec![0, 0, 0, 0x20];
    head.extend_from_slice(b"ftypisom");
    head.extend_from_slice(&[0u8; 64]);
    head
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeDownloader {
    labels: Vec<&'static str>,
    failing: HashSet<&'static str>,
    probe_fails: bool,
}

impl FakeDownloader {
    fn with_labels(labels: &[&'static str]) -> Self {
        Self {
            labels: labels.to_vec(),
            ..Default::default()
        }
    }

    fn failing(mut self, label: &'static str) -> Self {
        self.failing.insert(label);
        self
    }
}

#[async_trait]
impl ClipDownloader for FakeDownloader {
    async fn probe(&self, locator: &ClipUrl) -> Result<ClipInfo> {
        if self.probe_fails {
            return Err(Error::download("probe", "ERROR: Unable to download JSON metadata: HTTP Error 404"));
        }
        Ok(ClipInfo {
            id: locator.slug().to_string(),
            title: Some("Clutch ace".to_string()),
            duration_secs: Some(30.0),
            renditions: self
                .labels
                .iter()
                .map(|label| Rendition::new(format!("portrait-{label}"), *label))
                .collect(),
        })
    }

    async fn download(
        &self,
        _locator: &ClipUrl,
        rendition: &Rendition,
        output_dir: &Path,
    ) -> Result<RawStream> {
        if self.failing.contains(rendition.label.as_str()) {
            return Err(Error::download(rendition.label.as_str(), "HTTP Error 404: Not Found"));
        }
        let path = output_dir.join(format!("{}.mp4", rendition.label.key_safe()));
        tokio::fs::write(&path, mp4_head()).await?;
        Ok(RawStream {
            path,
            label: rendition.label.clone(),
            origin: StreamOrigin::Downloaded,
        })
    }
}

#[derive(Default)]
struct FakeRemuxer {
    failing: HashSet<&'static str>,
    /// Fail this many calls with a transient error before succeeding.
    flaky: AtomicU32,
}

impl FakeRemuxer {
    fn failing(label: &'static str) -> Self {
        Self {
            failing: HashSet::from([label]),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Remuxer for FakeRemuxer {
    async fn remux(&self, input: &RawStream, output_dir: &Path) -> Result<NormalizedStream> {
        if self.failing.contains(input.label.as_str()) {
            return Err(Error::Remux("moov atom not found".to_string()));
        }
        if self
            .flaky
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Remux("Connection reset by peer".to_string()));
        }

        let path = output_dir.join(format!("{}.mp4", input.label.key_safe()));
        tokio::fs::write(&path, mp4_head()).await?;
        Ok(NormalizedStream {
            path,
            label: input.label.clone(),
            mime: "video/mp4".to_string(),
            size_bytes: mp4_head().len() as u64,
            duration_secs: 30.0,
            height: input.label.height().or(Some(1080)),
            fps: input.label.fps().map(f64::from),
        })
    }
}

#[derive(Default)]
struct FakeThumbnailer {
    fails: bool,
}

#[async_trait]
impl ThumbnailExtractor for FakeThumbnailer {
    async fn extract(&self, _input: &NormalizedStream, at_secs: f64, output: &Path) -> Result<PathBuf> {
        assert!(at_secs > 0.0);
        if self.fails {
            return Err(Error::Thumbnail("Output file is empty, nothing was encoded".to_string()));
        }
        tokio::fs::write(output, b"\xff\xd8\xff\xe0jpeg").await?;
        Ok(output.to_path_buf())
    }
}

/// Versioned in-memory bucket: key -> versions (id, content type).
#[derive(Default)]
struct MemoryStore {
    versions: Mutex<BTreeMap<String, Vec<(u64, String)>>>,
    next_version: AtomicU64,
    /// Puts whose key contains one of these fail.
    reject: Vec<&'static str>,
    /// Puts whose key contains this never finish.
    stall: Option<&'static str>,
}

impl MemoryStore {
    /// Keys that still have at least one stored version.
    fn keys(&self) -> Vec<String> {
        self.versions.lock().keys().cloned().collect()
    }

    fn version_count(&self) -> usize {
        self.versions.lock().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<()> {
        if let Some(stall) = self.stall
            && key.contains(stall)
        {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.reject.iter().any(|r| key.contains(r)) {
            return Err(Error::upload(key, "403 Forbidden"));
        }
        assert!(tokio::fs::metadata(path).await?.len() > 0);
        let id = self.next_version.fetch_add(1, Ordering::SeqCst);
        self.versions
            .lock()
            .entry(key.to_string())
            .or_default()
            .push((id, content_type.to_string()));
        Ok(())
    }

    async fn list_versions(&self, prefix: &str) -> Result<Vec<ObjectVersion>> {
        Ok(self
            .versions
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .flat_map(|(k, versions)| {
                versions.iter().map(move |(id, _)| ObjectVersion {
                    key: k.clone(),
                    version_id: Some(id.to_string()),
                })
            })
            .collect())
    }

    async fn delete_version(&self, key: &str, version_id: Option<&str>) -> Result<()> {
        let mut versions = self.versions.lock();
        if let Some(list) = versions.get_mut(key) {
            list.retain(|(id, _)| version_id != Some(id.to_string().as_str()));
            if list.is_empty() {
                versions.remove(key);
            }
        }
        Ok(())
    }

    async fn check(&self) -> Result<()> {
        Ok(())
    }
}

struct BrokenSink;

#[async_trait]
impl MetadataSink for BrokenSink {
    async fn commit_ingestion(&self, _commit: &EventCommit) -> Result<()> {
        Err(Error::Other("database is locked".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 1.0,
        use_jitter: false,
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        max_workers: 2,
        retry: fast_retry(),
        attempt_timeout_secs: 30,
        thumbnail_fraction: 0.1,
        temp_dir: None,
    }
}

async fn setup_repo() -> Arc<SqlxEventRepository> {
    let pool = init_pool_with_size("sqlite::memory:", 1)
        .await
        .expect("Failed to create test pool");
    run_migrations(&pool).await.expect("Failed to run migrations");
    Arc::new(SqlxEventRepository::new(pool))
}

struct Harness {
    repo: Arc<SqlxEventRepository>,
    store: Arc<MemoryStore>,
    config: PipelineConfig,
    downloader: FakeDownloader,
    remuxer: FakeRemuxer,
    thumbnailer: FakeThumbnailer,
    sink: Option<Arc<dyn MetadataSink>>,
}

impl Harness {
    async fn new() -> Self {
        Self {
            repo: setup_repo().await,
            store: Arc::new(MemoryStore::default()),
            config: config(),
            downloader: FakeDownloader::with_labels(&["720p", "1080p60", "360p"]),
            remuxer: FakeRemuxer::default(),
            thumbnailer: FakeThumbnailer::default(),
            sink: None,
        }
    }

    fn build(self) -> (IngestPipeline, Arc<SqlxEventRepository>, Arc<MemoryStore>) {
        let publisher = StoragePublisher::new(self.store.clone(), CDN, self.config.retry.clone());
        let sink = self
            .sink
            .unwrap_or_else(|| self.repo.clone() as Arc<dyn MetadataSink>);
        let pipeline = IngestPipeline::new(
            self.config,
            Arc::new(self.downloader),
            Arc::new(self.remuxer),
            Arc::new(self.thumbnailer),
            publisher,
            sink,
        );
        (pipeline, self.repo, self.store)
    }
}

impl Harness {
    /// Build with attempt workspaces under a dedicated directory, returned so
    /// tests can check nothing is left behind.
    fn build_in_scratch(
        mut self,
    ) -> (IngestPipeline, Arc<SqlxEventRepository>, Arc<MemoryStore>, TempDir) {
        let scratch = tempfile::tempdir().expect("Failed to create scratch dir");
        self.config.temp_dir = Some(scratch.path().to_path_buf());
        let (pipeline, repo, store) = self.build();
        (pipeline, repo, store, scratch)
    }
}

fn is_empty_dir(dir: &TempDir) -> bool {
    std::fs::read_dir(dir.path())
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

async fn draft(repo: &SqlxEventRepository) -> i64 {
    repo.create_draft(&NewEvent::new("Clutch ace"))
        .await
        .expect("Failed to create draft")
}

fn labels<'a>(labels: impl IntoIterator<Item = &'a QualityLabel>) -> Vec<&'a str> {
    labels.into_iter().map(QualityLabel::as_str).collect()
}

// ---------------------------------------------------------------------------
// Remote clips
// ---------------------------------------------------------------------------

mod remote_clip {
    use super::*;

    #[tokio::test]
    async fn test_commit_publishes_best_first() {
        let (pipeline, repo, store, scratch) = Harness::new().await.build_in_scratch();
        let id = draft(&repo).await;

        let result = pipeline
            .ingest(IngestionRequest::remote_clip(id, CLIP))
            .await
            .unwrap();

        assert_eq!(result.status, IngestStatus::Committed);
        assert_eq!(
            labels(result.variants.iter().map(|v| &v.quality_label)),
            ["1080p60", "720p", "360p"]
        );
        let video_url = format!("{CDN}/events/{id}/{id}_1080p60.mp4");
        assert_eq!(result.video_url(), Some(video_url.as_str()));
        assert!(result.failures.is_empty());
        assert!(result.failed.is_empty());

        let thumbnail = result.thumbnail.as_ref().expect("thumbnail published");
        assert_eq!(thumbnail.storage_key, format!("events/{id}/thumbnail.jpg"));

        let event = repo.get_event(id).await.unwrap();
        assert!(event.published);
        assert_eq!(event.video_url.as_deref(), Some(video_url.as_str()));
        assert_eq!(event.original_clip_url.as_deref(), Some(CLIP));
        assert_eq!(event.thumbnail_url.as_deref(), Some(thumbnail.public_url.as_str()));

        let rows = repo.list_variants(id).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].quality_label, "1080p60");
        assert_eq!(rows[0].public_url, video_url);

        let mut expected = vec![
            format!("events/{id}/thumbnail.jpg"),
            format!("events/{id}/{id}_1080p60.mp4"),
            format!("events/{id}/{id}_360p.mp4"),
            format!("events/{id}/{id}_720p.mp4"),
        ];
        expected.sort();
        assert_eq!(store.keys(), expected);
        assert!(is_empty_dir(&scratch));
    }

    #[tokio::test]
    async fn test_two_renditions_two_rows() {
        let mut harness = Harness::new().await;
        harness.downloader = FakeDownloader::with_labels(&["720p", "1080p60"]);
        let (pipeline, repo, _store) = harness.build();
        let id = draft(&repo).await;

        let result = pipeline
            .ingest(IngestionRequest::remote_clip(id, CLIP))
            .await
            .unwrap();
        assert!(result.is_committed());

        let rows = repo.list_variants(id).await.unwrap();
        assert_eq!(rows.len(), 2);
        let event = repo.get_event(id).await.unwrap();
        assert_eq!(
            event.video_url.as_deref(),
            Some(format!("{CDN}/events/{id}/{id}_1080p60.mp4").as_str())
        );
    }

    #[tokio::test]
    async fn test_all_downloads_fail_aborts_cleanly() {
        let mut harness = Harness::new().await;
        harness.downloader = FakeDownloader::with_labels(&["1080p60", "720p"])
            .failing("1080p60")
            .failing("720p");
        let (pipeline, repo, store, scratch) = harness.build_in_scratch();
        let id = draft(&repo).await;

        let result = pipeline
            .ingest(IngestionRequest::remote_clip(id, CLIP))
            .await
            .unwrap();

        assert_eq!(result.status, IngestStatus::Aborted);
        assert!(result.variants.is_empty());
        assert!(result.thumbnail.is_none());
        assert_eq!(labels(&result.failed), ["1080p60", "720p"]);
        assert!(result.summary.contains("DownloadError"));
        assert!(result.summary.contains("ZeroVariantError"));

        let event = repo.get_event(id).await.unwrap();
        assert!(!event.published);
        assert_eq!(event.video_url, None);
        assert!(repo.list_variants(id).await.unwrap().is_empty());
        assert!(store.keys().is_empty());
        assert!(is_empty_dir(&scratch));
    }

    #[tokio::test]
    async fn test_clip_lookup_failure_aborts() {
        let mut harness = Harness::new().await;
        harness.downloader.probe_fails = true;
        let (pipeline, repo, store) = harness.build();
        let id = draft(&repo).await;

        let result = pipeline
            .ingest(IngestionRequest::remote_clip(id, CLIP))
            .await
            .unwrap();

        assert_eq!(result.status, IngestStatus::Aborted);
        assert_eq!(result.failures[0].stage, FailureStage::Download);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_single_remux_failure_aborts() {
        let mut harness = Harness::new().await;
        harness.downloader = FakeDownloader::with_labels(&["1080p60"]);
        harness.remuxer = FakeRemuxer::failing("1080p60");
        let (pipeline, repo, store) = harness.build();
        let id = draft(&repo).await;

        let result = pipeline
            .ingest(IngestionRequest::remote_clip(id, CLIP))
            .await
            .unwrap();

        assert_eq!(result.status, IngestStatus::Aborted);
        assert!(result.summary.contains("RemuxError"));
        assert_eq!(labels(&result.failed), ["1080p60"]);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_partial_remux_failure_commits_survivors() {
        let mut harness = Harness::new().await;
        harness.downloader = FakeDownloader::with_labels(&["1080p60", "720p"]);
        harness.remuxer = FakeRemuxer::failing("1080p60");
        let (pipeline, repo, _store) = harness.build();
        let id = draft(&repo).await;

        let result = pipeline
            .ingest(IngestionRequest::remote_clip(id, CLIP))
            .await
            .unwrap();

        assert!(result.is_committed());
        assert_eq!(labels(&result.succeeded), ["720p"]);
        assert_eq!(labels(&result.failed), ["1080p60"]);
        assert!(result.summary.contains("RemuxError [1080p60]"));
        assert_eq!(repo.list_variants(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_remux_failure_is_retried() {
        let mut harness = Harness::new().await;
        harness.downloader = FakeDownloader::with_labels(&["720p"]);
        harness.remuxer.flaky = AtomicU32::new(1);
        let (pipeline, repo, _store) = harness.build();
        let id = draft(&repo).await;

        let result = pipeline
            .ingest(IngestionRequest::remote_clip(id, CLIP))
            .await
            .unwrap();

        assert!(result.is_committed());
        assert!(result.failures.is_empty());
    }

    #[tokio::test]
    async fn test_upload_failure_is_per_variant() {
        let mut harness = Harness::new().await;
        harness.store = Arc::new(MemoryStore {
            reject: vec!["_360p"],
            ..Default::default()
        });
        let (pipeline, repo, store) = harness.build();
        let id = draft(&repo).await;

        let result = pipeline
            .ingest(IngestionRequest::remote_clip(id, CLIP))
            .await
            .unwrap();

        assert!(result.is_committed());
        assert_eq!(labels(&result.succeeded), ["1080p60", "720p"]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].stage, FailureStage::Upload);
        assert!(!store.keys().iter().any(|k| k.contains("_360p")));
    }

    #[tokio::test]
    async fn test_thumbnail_failure_does_not_abort() {
        let mut harness = Harness::new().await;
        harness.thumbnailer.fails = true;
        let (pipeline, repo, store) = harness.build();
        let id = draft(&repo).await;

        let result = pipeline
            .ingest(IngestionRequest::remote_clip(id, CLIP))
            .await
            .unwrap();

        assert!(result.is_committed());
        assert_eq!(result.variants.len(), 3);
        assert!(result.thumbnail.is_none());
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].stage, FailureStage::Thumbnail);
        assert!(result.failed.is_empty());

        let event = repo.get_event(id).await.unwrap();
        assert!(event.published);
        assert_eq!(event.thumbnail_url, None);
        assert!(!store.keys().iter().any(|k| k.ends_with("thumbnail.jpg")));
    }

    #[tokio::test]
    async fn test_reingest_writes_identical_keys() {
        let (pipeline, repo, store) = Harness::new().await.build();
        let id = draft(&repo).await;

        let first = pipeline
            .ingest(IngestionRequest::remote_clip(id, CLIP))
            .await
            .unwrap();
        let keys_after_first = store.keys();

        let second = pipeline
            .ingest(IngestionRequest::remote_clip(id, CLIP))
            .await
            .unwrap();

        assert!(first.is_committed() && second.is_committed());
        assert_eq!(store.keys(), keys_after_first);
        let first_keys: Vec<_> = first.variants.iter().map(|v| &v.storage_key).collect();
        let second_keys: Vec<_> = second.variants.iter().map(|v| &v.storage_key).collect();
        assert_eq!(first_keys, second_keys);
        assert_eq!(repo.list_variants(id).await.unwrap().len(), 3);
    }
}

// ---------------------------------------------------------------------------
// Direct uploads
// ---------------------------------------------------------------------------

mod direct_upload {
    use super::*;

    #[tokio::test]
    async fn test_upload_commits_single_variant() {
        let (pipeline, repo, store) = Harness::new().await.build();
        let id = draft(&repo).await;

        let upload = UploadHandle::from_bytes("my clip.mp4", "video/mp4", mp4_head());
        let result = pipeline
            .ingest(IngestionRequest::direct_upload(id, upload))
            .await
            .unwrap();

        assert!(result.is_committed());
        assert_eq!(labels(&result.succeeded), ["1080p"]);
        assert!(result.thumbnail.is_some());

        let event = repo.get_event(id).await.unwrap();
        assert!(event.published);
        assert_eq!(event.original_clip_url, None);
        assert_eq!(
            event.video_url.as_deref(),
            Some(format!("{CDN}/events/{id}/{id}_1080p.mp4").as_str())
        );
        assert_eq!(store.keys().len(), 2);
    }

    #[tokio::test]
    async fn test_upload_from_path() {
        let (pipeline, repo, _store) = Harness::new().await.build();
        let id = draft(&repo).await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("spooled.mov");
        std::fs::write(&file, mp4_head()).unwrap();

        let upload = UploadHandle::from_path("spooled.mov", "video/quicktime", &file);
        let result = pipeline
            .ingest(IngestionRequest::direct_upload(id, upload))
            .await
            .unwrap();

        assert!(result.is_committed());
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_unrecognized_bytes_rejected() {
        let (pipeline, repo, store) = Harness::new().await.build();
        let id = draft(&repo).await;

        let upload = UploadHandle::from_bytes("notes.mp4", "video/mp4", b"just some text".to_vec());
        let err = pipeline
            .ingest(IngestionRequest::direct_upload(id, upload))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert!(store.keys().is_empty());
        assert!(!repo.get_event(id).await.unwrap().published);
    }
}

// ---------------------------------------------------------------------------
// Aborts and compensating cleanup
// ---------------------------------------------------------------------------

mod cleanup {
    use super::*;

    #[tokio::test]
    async fn test_metadata_failure_rolls_back_objects() {
        let mut harness = Harness::new().await;
        harness.sink = Some(Arc::new(BrokenSink));
        let (pipeline, repo, store, scratch) = harness.build_in_scratch();
        let id = draft(&repo).await;

        let result = pipeline
            .ingest(IngestionRequest::remote_clip(id, CLIP))
            .await
            .unwrap();

        assert_eq!(result.status, IngestStatus::Aborted);
        assert!(result.variants.is_empty());
        assert!(result.thumbnail.is_none());
        assert_eq!(labels(&result.failed), ["1080p60", "720p", "360p"]);
        assert!(result.summary.contains("MetadataCommitError"));
        assert!(store.keys().is_empty());
        assert!(is_empty_dir(&scratch));
    }

    #[tokio::test]
    async fn test_timeout_rolls_back_objects() {
        let mut harness = Harness::new().await;
        harness.config.attempt_timeout_secs = 1;
        harness.store = Arc::new(MemoryStore {
            stall: Some("_720p"),
            ..Default::default()
        });
        let (pipeline, repo, store, scratch) = harness.build_in_scratch();
        let id = draft(&repo).await;

        let err = pipeline
            .ingest(IngestionRequest::remote_clip(id, CLIP))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        assert!(store.keys().is_empty());
        assert!(is_empty_dir(&scratch));
        assert!(!repo.get_event(id).await.unwrap().published);
    }

    #[tokio::test]
    async fn test_cancellation_rolls_back_objects() {
        let mut harness = Harness::new().await;
        harness.store = Arc::new(MemoryStore {
            stall: Some("_360p"),
            ..Default::default()
        });
        let (pipeline, repo, store) = harness.build();
        let token = CancellationToken::new();
        let pipeline = pipeline.with_cancellation(token.clone());
        let id = draft(&repo).await;

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            token.cancel();
        });

        let err = pipeline
            .ingest(IngestionRequest::remote_clip(id, CLIP))
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, Error::Cancelled));
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected_before_work() {
        let (pipeline, repo, store) = Harness::new().await.build();
        let id = draft(&repo).await;

        let mut both = IngestionRequest::remote_clip(id, CLIP);
        both.upload = Some(UploadHandle::from_bytes("a.mp4", "video/mp4", mp4_head()));
        let unsupported = IngestionRequest::remote_clip(id, "https://example.com/watch?v=1");
        let bad_type = IngestionRequest::direct_upload(
            id,
            UploadHandle::from_bytes("a.txt", "text/plain", mp4_head()),
        );

        for request in [both, unsupported, bad_type] {
            let err = pipeline.ingest(request).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "unexpected error: {err}");
        }
        assert!(store.keys().is_empty());
    }
}

// ---------------------------------------------------------------------------
// Service layer
// ---------------------------------------------------------------------------

mod service {
    use super::*;

    type Fixture = (
        IngestService<SqlxEventRepository>,
        Arc<SqlxEventRepository>,
        Arc<MemoryStore>,
    );

    fn service(harness: Harness) -> Fixture {
        let (pipeline, repo, store) = harness.build();
        let service = IngestService::new(repo.clone(), Arc::new(pipeline), ToolsConfig::default());
        (service, repo, store)
    }

    #[tokio::test]
    async fn test_new_event_committed_then_deleted() {
        let (service, repo, store) = service(Harness::new().await);

        let result = service
            .ingest(
                EventTarget::New(NewEvent::new("Clutch ace").with_slug("clutch-ace")),
                IngestSource::remote(CLIP),
            )
            .await
            .unwrap();
        assert!(result.is_committed());

        let details = service.show(result.event_id).await.unwrap();
        assert!(details.event.published);
        assert_eq!(details.variants.len(), 3);
        assert_eq!(details.variants[0].quality_label, "1080p60");

        let report = service.delete_event(result.event_id).await.unwrap();
        assert_eq!(report.objects_deleted, 4);
        assert!(report.row_deleted);
        assert!(store.keys().is_empty());
        assert!(matches!(
            repo.get_event(result.event_id).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_aborted_new_event_discards_draft() {
        let mut harness = Harness::new().await;
        harness.downloader = FakeDownloader::with_labels(&["720p"]).failing("720p");
        let (service, repo, _store) = service(harness);

        let result = service
            .ingest(EventTarget::New(NewEvent::new("Doomed")), IngestSource::remote(CLIP))
            .await
            .unwrap();

        assert!(!result.is_committed());
        assert!(matches!(
            repo.get_event(result.event_id).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_source_creates_no_draft() {
        let (service, repo, _store) = service(Harness::new().await);

        let err = service
            .ingest(EventTarget::New(NewEvent::new("Nothing")), IngestSource::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let id = draft(&repo).await;
        assert_eq!(id, 1);
    }

    #[tokio::test]
    async fn test_reingest_deletes_stale_variants() {
        let (service, repo, store) = service(Harness::new().await);
        let id = draft(&repo).await;

        let first = service
            .ingest(EventTarget::Existing(id), IngestSource::remote(CLIP))
            .await
            .unwrap();
        assert!(first.is_committed());
        assert!(store.keys().iter().any(|k| k.ends_with("_360p.mp4")));

        let upload = UploadHandle::from_bytes("clip.mp4", "video/mp4", mp4_head());
        let second = service
            .ingest(EventTarget::Existing(id), IngestSource::upload(upload))
            .await
            .unwrap();
        assert!(second.is_committed());

        assert_eq!(
            store.keys(),
            [
                format!("events/{id}/{id}_1080p.mp4"),
                format!("events/{id}/thumbnail.jpg"),
            ]
        );
        assert_eq!(repo.list_variants(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_event_removes_every_version() {
        let (service, repo, store) = service(Harness::new().await);
        let id = draft(&repo).await;

        for _ in 0..2 {
            let result = service
                .ingest(EventTarget::Existing(id), IngestSource::remote(CLIP))
                .await
                .unwrap();
            assert!(result.is_committed());
        }
        assert_eq!(store.keys().len(), 4);
        assert_eq!(store.version_count(), 8);

        let report = service.delete_event(id).await.unwrap();
        assert_eq!(report.objects_deleted, 8);
        assert_eq!(store.version_count(), 0);
    }

    #[tokio::test]
    async fn test_aborted_reingest_keeps_published_row() {
        let (service, repo, store) = service(Harness::new().await);
        let id = draft(&repo).await;
        let first = service
            .ingest(EventTarget::Existing(id), IngestSource::remote(CLIP))
            .await
            .unwrap();
        assert!(first.is_committed());
        let video_url = first.video_url().map(str::to_string);

        let mut harness = Harness::new().await;
        harness.repo = repo.clone();
        harness.store = store.clone();
        harness.sink = Some(Arc::new(BrokenSink));
        let (broken, _, _) = self::service(harness);

        let second = broken
            .ingest(EventTarget::Existing(id), IngestSource::remote(CLIP))
            .await
            .unwrap();
        assert_eq!(second.status, IngestStatus::Aborted);

        let event = repo.get_event(id).await.unwrap();
        assert!(event.published);
        assert_eq!(event.video_url, video_url);
        assert_eq!(repo.list_variants(id).await.unwrap().len(), 3);
        // The rollback removed the objects behind the row's URLs.
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_event_rejected() {
        let (service, _repo, store) = service(Harness::new().await);
        let err = service
            .ingest(EventTarget::Existing(404), IngestSource::remote(CLIP))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(store.keys().is_empty());
    }
}
