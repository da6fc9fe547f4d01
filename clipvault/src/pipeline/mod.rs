//! Ingestion pipeline.
//!
//! One attempt moves a single source video through
//! resolve -> fetch -> remux -> (thumbnail || publish) -> decide and either
//! commits the published variants as event metadata or rolls back every
//! object it wrote.
//!
//! The external tools sit behind the traits in [`processors`], object storage
//! behind [`crate::storage::ObjectStore`] and the relational store behind
//! [`MetadataSink`], so the whole flow can be driven with fakes.

pub mod orchestrator;
pub mod processors;
pub mod resolver;
pub mod worker_pool;
pub mod workspace;

use async_trait::async_trait;

use crate::Result;
use crate::domain::EventCommit;

pub use orchestrator::IngestPipeline;
pub use processors::{
    ClipDownloader, ClipInfo, FfmpegRemuxer, FfmpegThumbnailer, Remuxer, Rendition,
    ThumbnailExtractor, YtDlpDownloader,
};
pub use resolver::IngestionPlan;
pub use worker_pool::WorkerPool;
pub use workspace::Workspace;

/// Receives the metadata of a committed ingestion.
///
/// Implementations must apply the whole commit atomically: either the event
/// is published with every variant row, or nothing changes.
#[async_trait]
pub trait MetadataSink: Send + Sync {
    async fn commit_ingestion(&self, commit: &EventCommit) -> Result<()>;
}
