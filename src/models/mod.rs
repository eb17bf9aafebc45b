//! Data types passed between the storage layers.
//!
//! Backends speak in `ObjectAttributes` and `ObjectHead`; callers speak in
//! `PutOptions`, `UploadSource` and the thumbnail outcome types.

pub mod metadata;
pub mod object;
pub mod thumbnail;
