//! Repository layer for database access.
//!
//! Repositories hide SQL behind traits; `*TxOps` helpers run inside a
//! transaction owned by the caller.

pub mod event;
pub mod event_tx;

pub use event::*;
pub use event_tx::EventTxOps;
