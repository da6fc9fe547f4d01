//! Service container for dependency injection.
//!
//! Builds the database pool, the object store, the media tool adapters and
//! the ingestion pipeline from configuration, and owns their lifecycle.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::IngestService;
use crate::config::{AppConfig, StorageConfig};
use crate::database::repositories::SqlxEventRepository;
use crate::database::{self, DbPool};
use crate::pipeline::{FfmpegRemuxer, FfmpegThumbnailer, IngestPipeline, YtDlpDownloader};
use crate::storage::{ObjectStore, S3ObjectStore, StoragePublisher};
use crate::Result;

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: DbPool,
    /// Event repository.
    pub events: Arc<SqlxEventRepository>,
    /// Ingestion service.
    pub ingest: Arc<IngestService<SqlxEventRepository>>,
    /// Cancels in-flight ingestion attempts on shutdown.
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Connect to the database (running migrations) and the S3-compatible store.
    pub async fn new(config: &AppConfig, storage: &StorageConfig) -> Result<Self> {
        info!("Initializing service container");

        let pool = database::init_pool(&config.database_url).await?;
        database::run_migrations(&pool).await?;
        debug!(database_url = %config.database_url, "Database ready");

        let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::connect(storage).await);
        Ok(Self::with_store(config, pool, store, &storage.public_base_url))
    }

    /// Assemble the services on top of an existing pool and object store.
    pub fn with_store(
        config: &AppConfig,
        pool: DbPool,
        store: Arc<dyn ObjectStore>,
        public_base_url: &str,
    ) -> Self {
        let events = Arc::new(SqlxEventRepository::new(pool.clone()));
        let publisher = StoragePublisher::new(store, public_base_url, config.pipeline.retry.clone());
        let cancellation_token = CancellationToken::new();

        let tools = &config.tools;
        let pipeline = IngestPipeline::new(
            config.pipeline.clone(),
            Arc::new(YtDlpDownloader::new(&tools.ytdlp_path)),
            Arc::new(FfmpegRemuxer::new(&tools.ffmpeg_path, &tools.ffprobe_path)),
            Arc::new(FfmpegThumbnailer::new(&tools.ffmpeg_path)),
            publisher,
            events.clone(),
        )
        .with_cancellation(cancellation_token.child_token());

        let ingest = Arc::new(IngestService::new(
            events.clone(),
            Arc::new(pipeline),
            tools.clone(),
        ));

        info!("Service container initialized");

        Self {
            pool,
            events,
            ingest,
            cancellation_token,
        }
    }

    /// Get the cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if the container is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Cancel in-flight attempts and close the pool.
    pub async fn shutdown(&self) {
        info!("Shutting down services");
        self.cancellation_token.cancel();
        self.pool.close().await;
    }
}
