//! Attachment and thumbnail storage over S3- or GCS-compatible object stores.
//!
//! [`StorageConnection`] is the entry point: it loads settings, picks the
//! backend once and exposes put/get/delete/move/metadata operations with
//! folder handling. [`ThumbnailCache`] and [`UploadAdapter`] build on it.

pub mod backend;
pub mod config;
pub mod errors;
pub mod models;
pub mod services;

pub use config::{ServiceKind, SettingsFile, StorageConfig};
pub use errors::{StorageError, StorageResult};
pub use services::{
    renderer::{ConvertRenderer, ThumbnailRenderer},
    storage_service::{ConnectionState, StorageConnection},
    thumbnail_service::ThumbnailCache,
    upload_service::UploadAdapter,
};
