//! Per-attempt scratch directory.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::Result;

/// Temporary directory owned by one ingestion attempt.
///
/// The directory is removed when [`Workspace::close`] is called, and as a
/// fallback when the value is dropped (including when the attempt future is
/// cancelled).
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    /// Create a fresh workspace under `parent`, or the system temp dir.
    pub fn create(parent: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("clipvault-");
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        debug!(path = %path.display(), "Created attempt workspace");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create (if needed) and return a subdirectory of the workspace.
    pub async fn subdir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.path.join(name);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Remove the workspace now. Safe to call more than once.
    pub async fn close(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = self.path.clone();
        match tokio::task::spawn_blocking(move || dir.close()).await {
            Ok(Ok(())) => debug!(path = %path.display(), "Removed attempt workspace"),
            Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Failed to remove attempt workspace"),
            Err(e) => warn!(path = %path.display(), error = %e, "Workspace cleanup task failed"),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.dir.is_none()
    }
}
