//! Backend object clients.
//!
//! `ObjectClient` is the primitive capability every storage service provides.
//! `OpendalClient` implements it for both S3 and GCS; `connect` configures it
//! once from the settings and the rest of the crate never branches on the
//! kind again.

use crate::{
    config::{ServiceKind, StorageConfig},
    errors::{StorageError, StorageResult},
    models::{
        metadata::Metadata,
        object::{ByteStream, ObjectAttributes, ObjectHead},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use opendal::{ErrorKind, Operator};
use std::sync::Arc;
use tracing::{debug, warn};

mod client;
mod gcs;
#[cfg(test)]
pub(crate) mod memory;
mod s3;

pub use client::OpendalClient;
pub use gcs::{GcsJsonApi, ObjectPatch};

#[async_trait]
pub trait ObjectClient: Send + Sync {
    fn service_kind(&self) -> ServiceKind;

    fn bucket(&self) -> &str;

    /// Write `body` at `key`, replacing any existing object.
    async fn put(&self, key: &str, body: Bytes, attrs: &ObjectAttributes) -> StorageResult<()>;

    /// Write a streamed body at `key`, replacing any existing object.
    async fn put_stream(
        &self,
        key: &str,
        body: ByteStream,
        attrs: &ObjectAttributes,
    ) -> StorageResult<()>;

    /// Full object body. Missing objects yield `ObjectNotFound`.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Object attributes, or `None` when nothing is stored at `key`.
    async fn head(&self, key: &str) -> StorageResult<Option<ObjectHead>>;

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.head(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Server-side rename: the body never passes through this process.
    async fn relocate(&self, src: &str, dest: &str) -> StorageResult<()>;

    /// Every key starting with `prefix`.
    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Delete every key starting with `prefix`, returning how many were
    /// removed. Not atomic: a failure part-way leaves earlier deletes done.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize>;

    /// Rewrite `key` with new attributes, keeping its body.
    async fn rewrite_attributes(&self, key: &str, attrs: &ObjectAttributes) -> StorageResult<()>;

    /// Cheap round trip proving credentials and bucket are usable.
    async fn check(&self) -> StorageResult<()>;
}

/// Build the client for the configured service.
pub fn connect(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectClient>> {
    config.validate()?;
    let client: Arc<dyn ObjectClient> = match config.service_type {
        ServiceKind::S3 => Arc::new(OpendalClient::s3(config)?),
        ServiceKind::Gcs => Arc::new(OpendalClient::gcs(config)?),
    };
    Ok(client)
}

/// Join a normalized folder and a filename into an object key.
pub fn object_key(folder: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if folder.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        folder.to_string()
    } else {
        format!("{folder}{name}")
    }
}

// OpenDAL primitives used by `OpendalClient`.

fn operator_error(message: impl Into<String>, err: opendal::Error) -> StorageError {
    StorageError::configuration(format!("{}: {}", message.into(), err))
}

async fn write_object(
    op: &Operator,
    bucket: &str,
    key: &str,
    body: Bytes,
    attrs: &ObjectAttributes,
) -> StorageResult<()> {
    let mut write = op.write_with(key, body);
    if let Some(content_type) = attrs.content_type.as_deref() {
        write = write.content_type(content_type);
    }
    if let Some(disposition) = attrs.content_disposition.as_deref() {
        write = write.content_disposition(disposition);
    }
    if !attrs.metadata.is_empty() {
        write = write.user_metadata(attrs.metadata.clone());
    }
    write
        .await
        .map_err(|err| StorageError::from_backend(err, bucket, key))?;
    Ok(())
}

async fn write_object_stream(
    op: &Operator,
    bucket: &str,
    key: &str,
    mut body: ByteStream,
    attrs: &ObjectAttributes,
    chunk_size: usize,
) -> StorageResult<()> {
    let mut builder = op.writer_with(key).chunk(chunk_size);
    if let Some(content_type) = attrs.content_type.as_deref() {
        builder = builder.content_type(content_type);
    }
    if let Some(disposition) = attrs.content_disposition.as_deref() {
        builder = builder.content_disposition(disposition);
    }
    if !attrs.metadata.is_empty() {
        builder = builder.user_metadata(attrs.metadata.clone());
    }
    let mut writer = builder
        .await
        .map_err(|err| StorageError::from_backend(err, bucket, key))?;

    let mut written: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                abort_writer(&mut writer, bucket, key).await;
                return Err(StorageError::Io(err));
            }
        };
        written += chunk.len() as u64;
        if let Err(err) = writer.write(chunk).await {
            abort_writer(&mut writer, bucket, key).await;
            return Err(StorageError::from_backend(err, bucket, key));
        }
    }
    writer
        .close()
        .await
        .map_err(|err| StorageError::from_backend(err, bucket, key))?;

    debug!("streamed {} bytes to {}/{}", written, bucket, key);
    Ok(())
}

/// Abort a failed upload. A failed abort can leave an unfinished multipart
/// upload behind on the provider, so it is logged.
async fn abort_writer(writer: &mut opendal::Writer, bucket: &str, key: &str) {
    if let Err(err) = writer.abort().await {
        warn!("aborting upload of {}/{} failed: {}", bucket, key, err);
    }
}

async fn read_object(op: &Operator, bucket: &str, key: &str) -> StorageResult<Bytes> {
    let buffer = op
        .read(key)
        .await
        .map_err(|err| StorageError::from_backend(err, bucket, key))?;
    Ok(buffer.to_bytes())
}

/// The object body as a stream, for rewrites that must not buffer it whole.
async fn read_object_stream(op: &Operator, bucket: &str, key: &str) -> StorageResult<ByteStream> {
    let stream = op
        .reader(key)
        .await
        .map_err(|err| StorageError::from_backend(err, bucket, key))?
        .into_bytes_stream(..)
        .await
        .map_err(|err| StorageError::from_backend(err, bucket, key))?;
    Ok(stream.boxed())
}

async fn stat_object(op: &Operator, key: &str) -> StorageResult<Option<ObjectHead>> {
    let meta = match op.stat(key).await {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StorageError::Backend(err)),
    };

    let metadata: Metadata = meta
        .user_metadata()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    Ok(Some(ObjectHead {
        key: key.to_string(),
        size: meta.content_length(),
        content_type: meta.content_type().map(str::to_string),
        content_disposition: meta.content_disposition().map(str::to_string),
        etag: meta.etag().map(str::to_string),
        metadata,
    }))
}

/// List files under the directory containing `prefix`, keeping only keys
/// that start with `prefix` itself. Listing the parent lets a prefix like
/// `reports/2024-` match `reports/2024-01.pdf`.
async fn list_keys(op: &Operator, prefix: &str) -> StorageResult<Vec<String>> {
    let dir = match prefix.rfind('/') {
        Some(idx) => &prefix[..=idx],
        None => "/",
    };
    let entries = match op.list_with(dir).recursive(true).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(StorageError::Backend(err)),
    };
    let mut keys: Vec<String> = entries
        .into_iter()
        .filter(|entry| entry.metadata().is_file())
        .map(|entry| entry.path().to_string())
        .filter(|path| path.starts_with(prefix))
        .collect();
    keys.sort();
    Ok(keys)
}
