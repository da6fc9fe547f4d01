//! Service layer module.
//!
//! This module provides the service container and the ingestion service
//! used by the CLI.

pub mod container;
pub mod ingest;

pub use container::ServiceContainer;
pub use ingest::{
    DeleteReport, EventDetails, EventTarget, HealthReport, IngestService, IngestSource, ToolStatus,
};
