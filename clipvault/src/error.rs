//! Application-wide error types.

use std::time::Duration;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Download failed for {quality}: {message}")]
    Download { quality: String, message: String },

    #[error("Remux failed: {0}")]
    Remux(String),

    #[error("Thumbnail extraction failed: {0}")]
    Thumbnail(String),

    #[error("Upload failed for {key}: {message}")]
    Upload { key: String, message: String },

    #[error("No quality variant survived ingestion")]
    ZeroVariants,

    #[error("Metadata commit failed: {0}")]
    MetadataCommit(String),

    #[error("Ingestion timed out after {0:?}")]
    Timeout(Duration),

    #[error("Ingestion cancelled")]
    Cancelled,

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Process error: {0}")]
    Process(#[from] process_utils::ProcessError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Substrings in tool/network failures that indicate a retry may succeed.
const TRANSIENT_HINTS: &[&str] = &[
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "broken pipe",
    "temporary failure",
    "http error 5",
    "http error 429",
    "too many requests",
    "service unavailable",
    "slowdown",
    "dispatch failure",
];

fn message_is_transient(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_HINTS.iter().any(|hint| lower.contains(hint))
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn download(quality: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Download {
            quality: quality.into(),
            message: message.into(),
        }
    }

    pub fn upload(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upload {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the failed operation has a reasonable chance to succeed.
    ///
    /// Validation, state and configuration errors are never transient. Tool
    /// and network failures are classified by their message.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Download { message, .. } | Self::Upload { message, .. } => {
                message_is_transient(message)
            }
            Self::Remux(message) | Self::Thumbnail(message) | Self::Storage(message) => {
                message_is_transient(message)
            }
            Self::Process(err) => {
                matches!(err, process_utils::ProcessError::Wait { .. })
                    || message_is_transient(err.stderr())
            }
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}
