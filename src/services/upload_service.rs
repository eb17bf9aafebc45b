//! Upload adapter: stream an upload into storage, optionally handing the
//! stored bytes back to the caller.

use crate::{
    errors::StorageResult,
    models::object::{DEFAULT_CONTENT_TYPE, PutOptions, UploadSource},
    services::storage_service::StorageConnection,
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct UploadAdapter {
    storage: Arc<StorageConnection>,
}

impl UploadAdapter {
    pub fn new(storage: Arc<StorageConnection>) -> Self {
        Self { storage }
    }

    /// Stream `upload` to `path` in the primary folder.
    ///
    /// The upload is written as raw bytes; sources never pass through a text
    /// decoder, so the stored object is byte-identical to what was read.
    pub async fn save_upload(&self, upload: UploadSource, path: &str) -> StorageResult<()> {
        let streamed = upload.is_stream();
        self.storage
            .put_stream(
                path,
                "",
                upload,
                DEFAULT_CONTENT_TYPE,
                &PutOptions::default(),
            )
            .await?;
        debug!("saved upload to {} (streamed: {})", path, streamed);
        Ok(())
    }

    /// Like [`save_upload`](Self::save_upload), then re-read the object from
    /// storage and pass its bytes to `on_complete`.
    pub async fn save_upload_with<F, R>(
        &self,
        upload: UploadSource,
        path: &str,
        on_complete: F,
    ) -> StorageResult<R>
    where
        F: FnOnce(Bytes) -> R,
    {
        self.save_upload(upload, path).await?;
        let stored = self.storage.object_data(path, None).await?;
        Ok(on_complete(stored))
    }
}
