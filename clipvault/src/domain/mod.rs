//! Domain layer for clipvault.
//!
//! Requests, artifacts, outcomes and the ingestion state machine. Nothing in
//! here talks to external tools, storage or the database.

mod artifact;
mod commit;
mod outcome;
mod request;
mod state;
pub mod value_objects;

pub use artifact::{NormalizedStream, PublishedVariant, RawStream, StreamOrigin, ThumbnailArtifact};
pub use commit::EventCommit;
pub use outcome::{ArtifactFailure, FailureStage, IngestStatus, IngestionResult};
pub use request::{IngestionRequest, SourceMode, UploadBody, UploadHandle};
pub use state::{IngestState, StateTracker};
pub use value_objects::*;
