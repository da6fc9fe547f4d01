//! Domain value objects.
//!
//! Value objects are immutable objects that represent concepts in the domain
//! and are defined by their attributes rather than identity.

mod clip_url;
mod quality_label;
mod retry_policy;

pub use clip_url::ClipUrl;
pub use quality_label::{QualityLabel, SOURCE_LABEL};
pub use retry_policy::RetryPolicy;
