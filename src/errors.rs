//! Error taxonomy shared by the storage layers.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage configuration error: {0}")]
    Configuration(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error(transparent)]
    Backend(opendal::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("object api request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("object api returned {status} for `{key}`: {message}")]
    Api {
        status: u16,
        key: String,
        message: String,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Shortcut for a configuration failure.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Map a backend error for `key`, turning provider not-found into
    /// `ObjectNotFound` and passing everything else through untouched.
    pub fn from_backend(err: opendal::Error, bucket: &str, key: &str) -> Self {
        match err.kind() {
            opendal::ErrorKind::NotFound => Self::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            _ => Self::Backend(err),
        }
    }

    /// Map a non-success JSON API response for `key`.
    pub fn from_api(status: reqwest::StatusCode, bucket: &str, key: &str, message: String) -> Self {
        if status == reqwest::StatusCode::NOT_FOUND {
            return Self::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            };
        }
        Self::Api {
            status: status.as_u16(),
            key: key.to_string(),
            message,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound { .. })
    }
}

impl From<opendal::Error> for StorageError {
    fn from(err: opendal::Error) -> Self {
        Self::Backend(err)
    }
}
