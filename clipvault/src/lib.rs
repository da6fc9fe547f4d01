//! clipvault library crate.
//!
//! Ingests short video clips (remote clip links or uploaded files), publishes
//! their quality variants and a thumbnail to S3-compatible storage, and
//! records the result as event metadata in SQLite.

pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

pub use error::{Error, Result};
