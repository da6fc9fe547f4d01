//! Object storage.
//!
//! [`ObjectStore`] is the narrow capability the pipeline needs from a bucket.
//! [`S3ObjectStore`] implements it against any S3-compatible endpoint and
//! [`StoragePublisher`] layers the key scheme, retries and the upload ledger
//! on top.

pub mod keys;
pub mod publisher;
pub mod s3;

use std::path::Path;

use async_trait::async_trait;

use crate::Result;

pub use publisher::{StoragePublisher, UploadLedger};
pub use s3::S3ObjectStore;

/// One stored version of an object, or a delete marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    pub key: String,
    /// `None` on stores without versioning.
    pub version_id: Option<String>,
}

/// Minimal bucket operations used by the pipeline.
///
/// Removal is always by version: on a versioned bucket (B2 versions every
/// bucket) deleting a key only hides it, and the bytes stay billable.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file under `key`, replacing any existing object.
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<()>;

    /// List every version and delete marker whose key starts with `prefix`.
    async fn list_versions(&self, prefix: &str) -> Result<Vec<ObjectVersion>>;

    /// Permanently delete one version. Deleting an absent version succeeds.
    async fn delete_version(&self, key: &str, version_id: Option<&str>) -> Result<()>;

    /// Verify the bucket is reachable with the configured credentials.
    async fn check(&self) -> Result<()>;
}
