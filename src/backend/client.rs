//! OpenDAL-backed object client shared by S3 and GCS.
//!
//! Both services go through the same `Operator` primitives. What differs is
//! carried as fields: the streaming chunk size, how a prefix is deleted and
//! how attributes reach the provider. The per-service constructors live in
//! `s3.rs` and `gcs.rs`.

use super::{
    ObjectClient,
    gcs::{GcsJsonApi, ObjectPatch},
    list_keys, read_object, read_object_stream, stat_object, write_object, write_object_stream,
};
use crate::{
    config::ServiceKind,
    errors::{StorageError, StorageResult},
    models::object::{ByteStream, ObjectAttributes, ObjectHead},
};
use async_trait::async_trait;
use bytes::Bytes;
use opendal::Operator;
use tracing::debug;

/// How `delete_prefix` removes the listed keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PrefixDelete {
    /// One batched delete call; OpenDAL groups keys per request.
    Batched,
    /// One delete per key.
    PerObject,
}

/// How object attributes are applied.
pub(super) enum AttributeSync {
    /// Everything travels with the write request.
    OnWrite,
    /// Content-disposition is patched after each write, and attribute
    /// rewrites are a single metadata patch.
    Patch(GcsJsonApi),
}

pub struct OpendalClient {
    kind: ServiceKind,
    operator: Operator,
    bucket: String,
    chunk_size: usize,
    prefix_delete: PrefixDelete,
    attributes: AttributeSync,
}

impl OpendalClient {
    pub(super) fn new(
        kind: ServiceKind,
        operator: Operator,
        bucket: impl Into<String>,
        chunk_size: usize,
        prefix_delete: PrefixDelete,
        attributes: AttributeSync,
    ) -> Self {
        Self {
            kind,
            operator,
            bucket: bucket.into(),
            chunk_size,
            prefix_delete,
            attributes,
        }
    }

    /// Apply what the write request could not carry.
    async fn finish_write(&self, key: &str, attrs: &ObjectAttributes) -> StorageResult<()> {
        let AttributeSync::Patch(api) = &self.attributes else {
            return Ok(());
        };
        match attrs.content_disposition.as_deref() {
            Some(disposition) => api.patch(key, &ObjectPatch::disposition(disposition)).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectClient for OpendalClient {
    fn service_kind(&self) -> ServiceKind {
        self.kind
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, body: Bytes, attrs: &ObjectAttributes) -> StorageResult<()> {
        write_object(&self.operator, &self.bucket, key, body, attrs).await?;
        self.finish_write(key, attrs).await
    }

    async fn put_stream(
        &self,
        key: &str,
        body: ByteStream,
        attrs: &ObjectAttributes,
    ) -> StorageResult<()> {
        write_object_stream(
            &self.operator,
            &self.bucket,
            key,
            body,
            attrs,
            self.chunk_size,
        )
        .await?;
        self.finish_write(key, attrs).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        read_object(&self.operator, &self.bucket, key).await
    }

    async fn head(&self, key: &str) -> StorageResult<Option<ObjectHead>> {
        stat_object(&self.operator, key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.operator
            .delete(key)
            .await
            .map_err(|err| StorageError::from_backend(err, &self.bucket, key))
    }

    /// Server-side copy into `dest`, then drop the source.
    async fn relocate(&self, src: &str, dest: &str) -> StorageResult<()> {
        self.operator
            .copy(src, dest)
            .await
            .map_err(|err| StorageError::from_backend(err, &self.bucket, src))?;
        self.delete(src).await
    }

    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        list_keys(&self.operator, prefix).await
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let keys = self.list_prefix(prefix).await?;
        let count = keys.len();
        if count == 0 {
            return Ok(0);
        }
        match self.prefix_delete {
            PrefixDelete::Batched => self.operator.delete_iter(keys).await?,
            PrefixDelete::PerObject => {
                for key in &keys {
                    self.delete(key).await?;
                }
            }
        }
        debug!("deleted {} objects under {}/{}", count, self.bucket, prefix);
        Ok(count)
    }

    /// Patch in place where the provider allows it. Otherwise the body is
    /// streamed back onto the same key with the new attributes, so memory
    /// use stays bounded by the chunk size.
    async fn rewrite_attributes(&self, key: &str, attrs: &ObjectAttributes) -> StorageResult<()> {
        match &self.attributes {
            AttributeSync::Patch(api) => api.patch(key, &ObjectPatch::from(attrs)).await,
            AttributeSync::OnWrite => {
                let body = read_object_stream(&self.operator, &self.bucket, key).await?;
                write_object_stream(
                    &self.operator,
                    &self.bucket,
                    key,
                    body,
                    attrs,
                    self.chunk_size,
                )
                .await
            }
        }
    }

    async fn check(&self) -> StorageResult<()> {
        self.operator.check().await?;
        Ok(())
    }
}
