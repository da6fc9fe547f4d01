//! Publishing artifacts to object storage with compensating cleanup.

use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::ObjectStore;
use super::keys::{self, mime_from_extension};
use crate::domain::{NormalizedStream, PublishedVariant, RetryPolicy, ThumbnailArtifact};
use crate::utils::retry::{retry_any, retry_transient};
use crate::{Error, Result};

/// Keys written during one ingestion attempt.
///
/// Cloning shares the same ledger. A key is recorded before its write is
/// issued, so a put interrupted by the attempt deadline is still cleaned up.
#[derive(Debug, Clone, Default)]
pub struct UploadLedger {
    keys: Arc<Mutex<Vec<String>>>,
}

impl UploadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: &str) {
        let mut keys = self.keys.lock();
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }

    /// Snapshot of the recorded keys in write order.
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }

    fn forget(&self, key: &str) {
        self.keys.lock().retain(|k| k != key);
    }
}

/// Uploads variants and thumbnails under deterministic keys.
#[derive(Clone)]
pub struct StoragePublisher {
    store: Arc<dyn ObjectStore>,
    public_base_url: String,
    retry: RetryPolicy,
}

impl StoragePublisher {
    pub fn new(store: Arc<dyn ObjectStore>, public_base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            store,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn public_url(&self, key: &str) -> String {
        keys::public_url(&self.public_base_url, key)
    }

    /// Upload one remuxed stream as a published variant.
    pub async fn publish_variant(
        &self,
        event_id: i64,
        stream: &NormalizedStream,
        ledger: &UploadLedger,
    ) -> Result<PublishedVariant> {
        let key = keys::variant_key(event_id, &stream.label, stream.extension());
        self.put(&key, &stream.path, &stream.mime, ledger).await?;

        info!(event_id, quality = %stream.label, key = %key, size = stream.size_bytes, "Variant published");

        Ok(PublishedVariant {
            quality_label: stream.label.clone(),
            mime: stream.mime.clone(),
            size_bytes: stream.size_bytes,
            duration_secs: stream.duration_secs,
            public_url: self.public_url(&key),
            storage_key: key,
        })
    }

    /// Upload the poster image.
    pub async fn publish_thumbnail(
        &self,
        event_id: i64,
        path: &Path,
        ledger: &UploadLedger,
    ) -> Result<ThumbnailArtifact> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("jpg");
        let key = keys::thumbnail_key(event_id, ext);
        self.put(&key, path, mime_from_extension(ext), ledger).await?;

        info!(event_id, key = %key, "Thumbnail published");

        Ok(ThumbnailArtifact {
            public_url: self.public_url(&key),
            storage_key: key,
        })
    }

    async fn put(&self, key: &str, path: &Path, content_type: &str, ledger: &UploadLedger) -> Result<()> {
        ledger.record(key);
        retry_transient("upload", &self.retry, || self.store.put_file(key, path, content_type))
            .await
            .map_err(|e| match e {
                Error::Upload { .. } => e,
                other => Error::upload(key, other.to_string()),
            })
    }

    /// Delete every object recorded in `ledger`.
    ///
    /// Deleted keys are removed from the ledger, so calling this again only
    /// retries what is left. Absent objects count as deleted.
    pub async fn rollback(&self, ledger: &UploadLedger) -> Result<usize> {
        let keys = ledger.keys();
        if keys.is_empty() {
            return Ok(0);
        }

        debug!(count = keys.len(), "Rolling back uploaded objects");
        let deleted = self.delete_all(&keys, Some(ledger)).await?;
        info!(count = deleted, "Rolled back uploaded objects");
        Ok(deleted)
    }

    /// Delete specific keys outside of any attempt, e.g. variants a
    /// re-ingestion no longer produces.
    pub async fn delete_keys(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.delete_all(keys, None).await
    }

    /// Delete every object version and delete marker under `prefix`,
    /// returning how many versions were removed.
    pub async fn purge_prefix(&self, prefix: &str) -> Result<usize> {
        let versions = retry_any("list", &self.retry, || self.store.list_versions(prefix)).await?;
        if versions.is_empty() {
            return Ok(0);
        }

        let results = join_all(versions.iter().map(|version| async move {
            let result = retry_any("delete", &self.retry, || {
                self.store.delete_version(&version.key, version.version_id.as_deref())
            })
            .await;
            (version, result)
        }))
        .await;

        let mut deleted = 0;
        let mut failures = Vec::new();
        for (version, result) in results {
            match result {
                Ok(()) => deleted += 1,
                Err(e) => {
                    warn!(key = %version.key, version = ?version.version_id, error = %e, "Failed to delete object version");
                    failures.push(format!("{}: {e}", version.key));
                }
            }
        }

        info!(prefix = %prefix, count = deleted, "Purged object versions");
        aggregate_failures(deleted, failures)
    }

    /// Remove every stored version of exactly `key`.
    async fn hard_delete(&self, key: &str) -> Result<usize> {
        let versions = retry_any("list", &self.retry, || self.store.list_versions(key)).await?;
        let mut removed = 0;
        for version in versions.iter().filter(|v| v.key == key) {
            retry_any("delete", &self.retry, || {
                self.store.delete_version(key, version.version_id.as_deref())
            })
            .await?;
            removed += 1;
        }
        debug!(key = %key, versions = removed, "Object hard-deleted");
        Ok(removed)
    }

    async fn delete_all(&self, keys: &[String], ledger: Option<&UploadLedger>) -> Result<usize> {
        let results = join_all(keys.iter().map(|key| async move {
            let result = self.hard_delete(key).await;
            (key, result)
        }))
        .await;

        let mut deleted = 0;
        let mut failures = Vec::new();
        for (key, result) in results {
            match result {
                Ok(_) => {
                    deleted += 1;
                    if let Some(ledger) = ledger {
                        ledger.forget(key);
                    }
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to delete object");
                    failures.push(format!("{key}: {e}"));
                }
            }
        }

        aggregate_failures(deleted, failures)
    }
}

fn aggregate_failures(deleted: usize, failures: Vec<String>) -> Result<usize> {
    if failures.is_empty() {
        Ok(deleted)
    } else {
        Err(Error::storage(format!(
            "failed to delete {} object(s): {}",
            failures.len(),
            failures.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QualityLabel;
    use crate::storage::ObjectVersion;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashSet};

    /// Versioned in-memory bucket: every put adds a version, deletes need
    /// an explicit version id.
    #[derive(Default)]
    struct MemoryStore {
        versions: Mutex<BTreeMap<String, Vec<(u64, Option<String>)>>>,
        next_version: Mutex<u64>,
        failing_deletes: Mutex<HashSet<String>>,
        put_failures_left: Mutex<u32>,
    }

    impl MemoryStore {
        fn push(&self, key: &str, content_type: Option<String>) {
            let id = {
                let mut next = self.next_version.lock();
                *next += 1;
                *next
            };
            self.versions
                .lock()
                .entry(key.to_string())
                .or_default()
                .push((id, content_type));
        }

        /// Simulates a plain delete on a versioned bucket.
        fn hide(&self, key: &str) {
            self.push(key, None);
        }

        fn content_type(&self, key: &str) -> Option<String> {
            self.versions
                .lock()
                .get(key)
                .and_then(|v| v.last())
                .and_then(|(_, ct)| ct.clone())
        }

        fn version_count(&self) -> usize {
            self.versions.lock().values().map(Vec::len).sum()
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn put_file(&self, key: &str, _path: &Path, content_type: &str) -> Result<()> {
            {
                let mut left = self.put_failures_left.lock();
                if *left > 0 {
                    *left -= 1;
                    return Err(Error::upload(key, "503 service unavailable"));
                }
            }
            self.push(key, Some(content_type.to_string()));
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
            if self.failing_deletes.lock().contains(key) {
                return Err(Error::storage("AccessDenied"));
            }
            let mut versions = self.versions.lock();
            if let Some(list) = versions.get_mut(key) {
                list.retain(|(id, _)| Some(id.to_string().as_str()) != version_id);
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

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 2.0,
            use_jitter: false,
        }
    }

    fn stream(label: &str) -> NormalizedStream {
        NormalizedStream {
            path: format!("/tmp/{label}.mp4").into(),
            label: QualityLabel::new(label),
            mime: "video/mp4".to_string(),
            size_bytes: 1024,
            duration_secs: 12.5,
            height: Some(720),
            fps: Some(30.0),
        }
    }

    #[tokio::test]
    async fn test_publish_variant_and_rollback() {
        let store = Arc::new(MemoryStore::default());
        let publisher = StoragePublisher::new(store.clone(), "https://cdn.example.com/", fast_retry());
        let ledger = UploadLedger::new();

        let variant = publisher.publish_variant(9, &stream("720p"), &ledger).await.unwrap();
        assert_eq!(variant.storage_key, "events/9/9_720p.mp4");
        assert_eq!(variant.public_url, "https://cdn.example.com/events/9/9_720p.mp4");
        assert_eq!(ledger.keys(), vec!["events/9/9_720p.mp4".to_string()]);

        let thumb = publisher
            .publish_thumbnail(9, Path::new("/tmp/thumb.jpg"), &ledger)
            .await
            .unwrap();
        assert_eq!(thumb.storage_key, "events/9/thumbnail.jpg");
        assert_eq!(store.content_type("events/9/thumbnail.jpg").as_deref(), Some("image/jpeg"));

        assert_eq!(publisher.rollback(&ledger).await.unwrap(), 2);
        assert!(store.versions.lock().is_empty());
        assert!(ledger.is_empty());
        // Second rollback is a no-op.
        assert_eq!(publisher.rollback(&ledger).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transient_upload_failure_is_retried() {
        let store = Arc::new(MemoryStore::default());
        *store.put_failures_left.lock() = 2;
        let publisher = StoragePublisher::new(store.clone(), "https://cdn.example.com", fast_retry());
        let ledger = UploadLedger::new();

        publisher.publish_variant(1, &stream("1080p"), &ledger).await.unwrap();
        assert!(store.versions.lock().contains_key("events/1/1_1080p.mp4"));
    }

    #[tokio::test]
    async fn test_rollback_keeps_failed_keys_for_retry() {
        let store = Arc::new(MemoryStore::default());
        let publisher = StoragePublisher::new(store.clone(), "https://cdn.example.com", fast_retry());
        let ledger = UploadLedger::new();
        publisher.publish_variant(3, &stream("720p"), &ledger).await.unwrap();
        publisher.publish_variant(3, &stream("360p"), &ledger).await.unwrap();

        store.failing_deletes.lock().insert("events/3/3_360p.mp4".to_string());
        assert!(publisher.rollback(&ledger).await.is_err());
        assert_eq!(ledger.keys(), vec!["events/3/3_360p.mp4".to_string()]);

        store.failing_deletes.lock().clear();
        assert_eq!(publisher.rollback(&ledger).await.unwrap(), 1);
        assert!(store.versions.lock().is_empty());
    }

    #[tokio::test]
    async fn test_purge_prefix() {
        let store = Arc::new(MemoryStore::default());
        let publisher = StoragePublisher::new(store.clone(), "https://cdn.example.com", fast_retry());
        let ledger = UploadLedger::new();
        publisher.publish_variant(5, &stream("720p"), &ledger).await.unwrap();
        publisher.publish_variant(50, &stream("720p"), &ledger).await.unwrap();

        assert_eq!(publisher.purge_prefix(&keys::event_prefix(5)).await.unwrap(), 1);
        assert!(store.versions.lock().contains_key("events/50/50_720p.mp4"));
    }

    #[tokio::test]
    async fn test_purge_removes_old_versions_and_delete_markers() {
        let store = Arc::new(MemoryStore::default());
        let publisher = StoragePublisher::new(store.clone(), "https://cdn.example.com", fast_retry());
        let ledger = UploadLedger::new();
        publisher.publish_variant(6, &stream("720p"), &ledger).await.unwrap();
        publisher.publish_variant(6, &stream("720p"), &ledger).await.unwrap();
        store.hide("events/6/6_720p.mp4");
        assert_eq!(store.version_count(), 3);

        assert_eq!(publisher.purge_prefix(&keys::event_prefix(6)).await.unwrap(), 3);
        assert!(store.versions.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_removes_every_version_of_a_key() {
        let store = Arc::new(MemoryStore::default());
        let publisher = StoragePublisher::new(store.clone(), "https://cdn.example.com", fast_retry());
        let earlier = UploadLedger::new();
        publisher.publish_variant(8, &stream("360p"), &earlier).await.unwrap();

        let ledger = UploadLedger::new();
        publisher.publish_variant(8, &stream("360p"), &ledger).await.unwrap();
        publisher.publish_variant(8, &stream("360p"), &ledger).await.unwrap();
        publisher.publish_variant(80, &stream("360p"), &ledger).await.unwrap();

        assert_eq!(publisher.rollback(&ledger).await.unwrap(), 2);
        assert_eq!(store.version_count(), 0);
    }
}
