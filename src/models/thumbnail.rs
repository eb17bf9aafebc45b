//! Results of thumbnail generation.

use bytes::Bytes;
use std::fmt;

/// A stored thumbnail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    /// `digest` metadata of the stored object. `None` when the object was
    /// written without one.
    pub digest: Option<String>,
    pub bytes: Bytes,
}

/// Why no thumbnail could be served. The host falls back to another
/// rendering path for every variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    ConverterUnavailable,
    RasterizerUnavailable,
    SourceUnreadable,
    UnsupportedMimeType(String),
    NotPdf(String),
    RenderFailed(String),
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissReason::ConverterUnavailable => f.write_str("image converter unavailable"),
            MissReason::RasterizerUnavailable => f.write_str("pdf rasterizer unavailable"),
            MissReason::SourceUnreadable => f.write_str("source object unreadable"),
            MissReason::UnsupportedMimeType(mime) => write!(f, "unsupported mime type {mime}"),
            MissReason::NotPdf(mime) => write!(f, "expected a pdf source, found {mime}"),
            MissReason::RenderFailed(cause) => write!(f, "render failed: {cause}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailOutcome {
    Hit(Thumbnail),
    Miss(MissReason),
}

impl ThumbnailOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, ThumbnailOutcome::Hit(_))
    }

    pub fn thumbnail(self) -> Option<Thumbnail> {
        match self {
            ThumbnailOutcome::Hit(thumbnail) => Some(thumbnail),
            ThumbnailOutcome::Miss(_) => None,
        }
    }
}
