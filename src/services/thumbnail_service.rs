//! Digest-verified thumbnail cache.
//!
//! Thumbnails live in the thumbnail folder under the target name. The
//! existence of that object is the cache-hit signal; nothing compares content.
//! Two callers missing on the same target at once may both render and both
//! store. Renders are deterministic for the same source and size, so whichever
//! write lands last is equivalent, and each write carries the digest of its
//! own bytes.

use crate::{
    errors::StorageResult,
    models::{
        metadata::sha256_hex,
        object::PutOptions,
        thumbnail::{MissReason, Thumbnail, ThumbnailOutcome},
    },
    services::{
        renderer::{RenderRequest, ThumbnailRenderer, sniff_mime},
        storage_service::StorageConnection,
    },
};
use std::{path::Path, sync::Arc};
use tracing::{debug, error, warn};

/// MIME types a thumbnail can be made from.
pub const ALLOWED_TYPES: [&str; 6] = [
    "image/bmp",
    "image/gif",
    "image/jpeg",
    "image/png",
    "image/webp",
    "application/pdf",
];

pub const PDF_TYPE: &str = "application/pdf";

#[derive(Clone)]
pub struct ThumbnailCache {
    storage: Arc<StorageConnection>,
    renderer: Arc<dyn ThumbnailRenderer>,
}

impl ThumbnailCache {
    pub fn new(storage: Arc<StorageConnection>, renderer: Arc<dyn ThumbnailRenderer>) -> Self {
        Self { storage, renderer }
    }

    /// Serve the thumbnail stored as `target`, generating it from `source`
    /// on first request.
    ///
    /// - Tool missing, unreadable source, unsupported type or render failure
    ///   come back as `Miss` and leave storage untouched.
    /// - Backend failures while checking, storing or reading the thumbnail
    ///   are returned as errors.
    pub async fn generate(
        &self,
        source: &str,
        target: &str,
        size: u32,
        is_pdf: bool,
    ) -> StorageResult<ThumbnailOutcome> {
        if !self.renderer.converter_available().await {
            return Ok(ThumbnailOutcome::Miss(MissReason::ConverterUnavailable));
        }
        if is_pdf && !self.renderer.rasterizer_available().await {
            return Ok(ThumbnailOutcome::Miss(MissReason::RasterizerUnavailable));
        }

        let thumb_folder = self.storage.thumb_folder()?;
        let mut object = self.storage.object(target, Some(&thumb_folder))?;

        if object.exists().await? {
            debug!("thumbnail cache hit for {}", object.key());
        } else {
            if let Some(reason) = self
                .render_and_store(source, target, &thumb_folder, size, is_pdf)
                .await?
            {
                return Ok(ThumbnailOutcome::Miss(reason));
            }
            object.reload();
        }

        Ok(ThumbnailOutcome::Hit(Thumbnail {
            digest: object.digest().await?,
            bytes: object.data().await?,
        }))
    }

    /// Render `source` and store it as `target`. Returns the miss reason
    /// when nothing was stored.
    async fn render_and_store(
        &self,
        source: &str,
        target: &str,
        thumb_folder: &str,
        size: u32,
        is_pdf: bool,
    ) -> StorageResult<Option<MissReason>> {
        let raw = match self.storage.object_data(source, None).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!("thumbnail source {} unreadable: {}", source, err);
                return Ok(Some(MissReason::SourceUnreadable));
            }
        };

        let mime_type = sniff_mime(&raw);
        if !ALLOWED_TYPES.contains(&mime_type) {
            debug!("no thumbnail for {}: type {}", source, mime_type);
            return Ok(Some(MissReason::UnsupportedMimeType(mime_type.to_string())));
        }
        if is_pdf && mime_type != PDF_TYPE {
            return Ok(Some(MissReason::NotPdf(mime_type.to_string())));
        }

        let request = RenderRequest::new(size, is_pdf).with_extension_from(source);
        let rendered = match self.renderer.render(&raw, &request).await {
            Ok(rendered) => rendered,
            Err(err) => {
                error!("Creating thumbnail failed ({})", err);
                return Ok(Some(MissReason::RenderFailed(err.to_string())));
            }
        };

        let digest = sha256_hex(&rendered.bytes);
        let original_name = Path::new(target)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(target);
        self.storage
            .put(
                target,
                original_name,
                rendered.bytes,
                &rendered.mime_type,
                &PutOptions::default()
                    .in_folder(thumb_folder)
                    .with_digest(digest),
            )
            .await?;

        Ok(None)
    }

    /// Delete every thumbnail whose name starts with `prefix` (all of them
    /// for an empty prefix).
    pub async fn batch_delete(&self, prefix: &str) -> StorageResult<usize> {
        let thumb_folder = self.storage.thumb_folder()?;
        let prefix = format!("{}{}", thumb_folder, prefix.trim_start_matches('/'));
        self.storage.batch_delete(&prefix).await
    }
}
