//! Adapters for the external media tools.

pub mod download;
pub mod remux;
pub mod thumbnail;
pub mod traits;

pub use download::YtDlpDownloader;
pub use remux::{FfmpegRemuxer, MediaProbe};
pub use thumbnail::{FfmpegThumbnailer, select_thumbnail_source, thumbnail_offset};
pub use traits::{ClipDownloader, ClipInfo, Remuxer, Rendition, ThumbnailExtractor};
