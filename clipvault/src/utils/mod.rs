//! Small helpers shared across the pipeline.

pub mod filename;
pub mod retry;
