//! Deterministic object keys and public URLs.
//!
//! Re-ingesting an event writes to the same keys, overwriting the previous
//! objects in place.

use crate::domain::QualityLabel;

/// Prefix under which every object of an event lives.
pub fn event_prefix(event_id: i64) -> String {
    format!("events/{event_id}/")
}

/// `events/<id>/<id>_<label>.<ext>`
pub fn variant_key(event_id: i64, label: &QualityLabel, ext: &str) -> String {
    format!(
        "{}{event_id}_{}.{}",
        event_prefix(event_id),
        label.key_safe(),
        ext.trim_start_matches('.')
    )
}

/// `events/<id>/thumbnail.<ext>`
pub fn thumbnail_key(event_id: i64, ext: &str) -> String {
    format!("{}thumbnail.{}", event_prefix(event_id), ext.trim_start_matches('.'))
}

/// Public URL of an object: base URL without trailing slash, `/`, key.
pub fn public_url(base_url: &str, key: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), key.trim_start_matches('/'))
}

/// MIME type for a published file extension.
pub fn mime_from_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
