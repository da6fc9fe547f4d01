//! S3-compatible object store (Backblaze B2 by default).

use std::path::Path;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use super::{ObjectStore, ObjectVersion};
use crate::config::StorageConfig;
use crate::{Error, Result};

/// Error codes that mean the object is already gone.
const NOT_FOUND_CODES: &[&str] = &["NoSuchKey", "NoSuchVersion", "NotFound", "404"];

/// Object store backed by the AWS SDK.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    cache_control: String,
}

impl S3ObjectStore {
    /// Build a client with static credentials against the configured endpoint.
    pub async fn connect(config: &StorageConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "clipvault",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(config.endpoint_url.clone())
            .load()
            .await;

        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(config.force_path_style)
                .build(),
        );

        info!(
            endpoint = %config.endpoint_url,
            bucket = %config.bucket,
            "Object store client initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
            cache_control: config.cache_control.clone(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn is_not_found_code(code: Option<&str>) -> bool {
    code.is_some_and(|c| NOT_FOUND_CODES.contains(&c))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| Error::upload(key, format!("failed to read {}: {e}", path.display())))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .cache_control(&self.cache_control)
            .send()
            .await
            .map_err(|e| Error::upload(key, DisplayErrorContext(&e).to_string()))?;

        debug!(key = %key, content_type = %content_type, "Object uploaded");
        Ok(())
    }

    async fn list_versions(&self, prefix: &str) -> Result<Vec<ObjectVersion>> {
        let mut versions = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_id_marker: Option<String> = None;

        loop {
            let response = self
                .client
                .list_object_versions()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_id_marker.take())
                .send()
                .await
                .map_err(|e| {
                    Error::storage(format!(
                        "failed to list versions of {prefix}: {}",
                        DisplayErrorContext(&e)
                    ))
                })?;

            versions.extend(response.versions().iter().filter_map(|v| {
                Some(ObjectVersion {
                    key: v.key()?.to_string(),
                    version_id: v.version_id().map(str::to_string),
                })
            }));
            versions.extend(response.delete_markers().iter().filter_map(|m| {
                Some(ObjectVersion {
                    key: m.key()?.to_string(),
                    version_id: m.version_id().map(str::to_string),
                })
            }));

            if !response.is_truncated().unwrap_or(false) {
                break;
            }
            key_marker = response.next_key_marker().map(str::to_string);
            version_id_marker = response.next_version_id_marker().map(str::to_string);
            if key_marker.is_none() {
                break;
            }
        }

        Ok(versions)
    }

    async fn delete_version(&self, key: &str, version_id: Option<&str>) -> Result<()> {
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .send()
            .await
        {
            Ok(_) => {
                debug!(key = %key, version = ?version_id, "Object version deleted");
                Ok(())
            }
            Err(e) if is_not_found_code(e.as_service_error().and_then(|se| se.code())) => {
                debug!(key = %key, version = ?version_id, "Object version already absent");
                Ok(())
            }
            Err(e) => Err(Error::storage(format!(
                "failed to delete {key}: {}",
                DisplayErrorContext(&e)
            ))),
        }
    }

    async fn check(&self) -> Result<()> {
        self.client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| {
                Error::storage(format!(
                    "bucket {} is not reachable: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}
