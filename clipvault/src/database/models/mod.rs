//! Database models.

mod event;

pub use event::{EventDbModel, EventVideoDbModel, NewEvent};
