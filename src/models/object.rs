//! Objects as seen by the storage layer.

use super::metadata::{DIGEST_KEY, Metadata};
use bytes::Bytes;
use futures::{Stream, StreamExt, stream::BoxStream};
use std::{fmt, io};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// Streamed object body.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Attributes written alongside an object body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectAttributes {
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub metadata: Metadata,
}

/// What a backend reports about a stored object without its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    /// Full key including the folder prefix.
    pub key: String,

    /// Size in bytes.
    pub size: u64,

    pub content_type: Option<String>,
    pub content_disposition: Option<String>,

    /// Provider entity tag, when reported.
    pub etag: Option<String>,

    /// User metadata.
    pub metadata: Metadata,
}

impl ObjectHead {
    /// The stored `digest` metadata entry.
    pub fn digest(&self) -> Option<&str> {
        self.metadata.get(DIGEST_KEY).map(String::as_str)
    }

    /// Attributes to carry over when rewriting this object.
    pub fn attributes(&self) -> ObjectAttributes {
        ObjectAttributes {
            content_type: self.content_type.clone(),
            content_disposition: self.content_disposition.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Per-call options for `put` and `put_stream`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Overrides the configured primary folder.
    pub target_folder: Option<String>,
    /// Stored as the `digest` metadata entry.
    pub digest: Option<String>,
}

impl PutOptions {
    pub fn in_folder(mut self, folder: impl Into<String>) -> Self {
        self.target_folder = Some(folder.into());
        self
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }
}

/// Body of an upload: either already in memory or a byte stream.
///
/// Chunks are raw bytes end to end, so nothing on the upload path can
/// re-encode the payload.
pub enum UploadSource {
    Buffered(Bytes),
    Stream(ByteStream),
}

impl UploadSource {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::Stream(stream.boxed())
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::Stream(ReaderStream::new(reader).boxed())
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for UploadSource {
    fn from(bytes: Bytes) -> Self {
        Self::Buffered(bytes)
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Buffered(Bytes::from(bytes))
    }
}
