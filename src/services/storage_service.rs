//! src/services/storage_service.rs
//!
//! StorageConnection: the unified object-storage contract used by the
//! thumbnail cache, the upload adapter and the CLI. It owns configuration,
//! lazily builds the backend client for the configured service, resolves
//! folders into object keys and layers the no-clobber move and metadata merge
//! rules on top of the backend primitives.

use crate::{
    backend::{self, ObjectClient, object_key},
    config::{SettingsFile, StorageConfig, normalize_folder},
    errors::{StorageError, StorageResult},
    models::{
        metadata::{self, Metadata, digest_metadata},
        object::{ObjectAttributes, ObjectHead, PutOptions, UploadSource},
    },
};
use bytes::Bytes;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info};

/// Lifecycle of a connection. There is no way back to an earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Settings have not been read yet.
    Uninitialized,
    /// Settings are loaded; no backend client exists yet.
    Configured,
    /// The backend client is built and memoized.
    Connected,
}

/// StorageConnection provides the object operations every higher layer uses:
/// - put / put_stream (write with content-disposition and optional digest)
/// - object_data / object_exists / object (read, check, cached handle)
/// - delete / batch_delete
/// - move_object (no-clobber rename)
/// - update_object_metadata (merge)
///
/// Settings and the backend client are each initialized at most once, on
/// first use, and are read-only afterwards. Share one instance behind an
/// `Arc`.
pub struct StorageConnection {
    settings: Option<SettingsFile>,
    config: OnceCell<StorageConfig>,
    client: OnceCell<Arc<dyn ObjectClient>>,
}

impl StorageConnection {
    /// Connection over an already loaded configuration.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            settings: None,
            config: OnceCell::with_value(config),
            client: OnceCell::new(),
        }
    }

    /// Connection that reads `settings` the first time anything needs it.
    /// On a multi-threaded runtime the read is moved off the worker with
    /// `block_in_place`; `StorageConnection::new(settings.load_async().await?)`
    /// avoids the blocking read entirely.
    pub fn from_settings(settings: SettingsFile) -> Self {
        Self {
            settings: Some(settings),
            config: OnceCell::new(),
            client: OnceCell::new(),
        }
    }

    /// Connection over an existing client, skipping backend selection.
    pub fn with_client(config: StorageConfig, client: Arc<dyn ObjectClient>) -> Self {
        Self {
            settings: None,
            config: OnceCell::with_value(config),
            client: OnceCell::with_value(client),
        }
    }

    pub fn state(&self) -> ConnectionState {
        if self.client.get().is_some() {
            ConnectionState::Connected
        } else if self.config.get().is_some() {
            ConnectionState::Configured
        } else {
            ConnectionState::Uninitialized
        }
    }

    /// Loaded configuration, reading the settings file on first call.
    pub fn config(&self) -> StorageResult<&StorageConfig> {
        self.config.get_or_try_init(|| match &self.settings {
            Some(settings) => read_settings(settings),
            None => Err(StorageError::configuration("no storage settings provided")),
        })
    }

    /// Backend client, built on first call.
    pub fn client(&self) -> StorageResult<Arc<dyn ObjectClient>> {
        let client = self.client.get_or_try_init(|| {
            let config = self.config()?;
            let client = backend::connect(config)?;
            info!(
                "connected to {} bucket `{}`",
                config.service_type, config.bucket
            );
            Ok::<_, StorageError>(client)
        })?;
        Ok(Arc::clone(client))
    }

    /// Normalized primary folder.
    pub fn folder(&self) -> StorageResult<String> {
        Ok(self.config()?.folder())
    }

    /// Normalized thumbnail folder (`tmp/` unless configured).
    pub fn thumb_folder(&self) -> StorageResult<String> {
        Ok(self.config()?.thumb_folder())
    }

    /// Normalized import folder (`tmp/` unless configured).
    pub fn import_folder(&self) -> StorageResult<String> {
        Ok(self.config()?.import_folder())
    }

    /// Resolve an explicit folder, or the primary folder when `None`.
    fn resolve_folder(&self, folder: Option<&str>) -> StorageResult<String> {
        match folder {
            Some(folder) => Ok(normalize_folder(Some(folder), "")),
            None => self.folder(),
        }
    }

    /// Full object key for `name` inside `folder` (primary folder if `None`).
    pub fn key_for(&self, name: &str, folder: Option<&str>) -> StorageResult<String> {
        Ok(object_key(&self.resolve_folder(folder)?, name))
    }

    fn write_attributes(
        original_name: &str,
        content_type: &str,
        opts: &PutOptions,
    ) -> ObjectAttributes {
        ObjectAttributes {
            content_type: Some(content_type.to_string()),
            content_disposition: Some(content_disposition(original_name)),
            metadata: digest_metadata(opts.digest.as_deref()),
        }
    }

    /// Write an object, replacing whatever is stored at the key.
    ///
    /// - Key is `opts.target_folder` (or the primary folder) plus `name`.
    /// - Content-disposition is `inline; filename=<url-encoded original_name>`.
    /// - `opts.digest` is stored as the `digest` metadata entry.
    ///
    /// Backend failures are returned as-is; nothing is retried here.
    pub async fn put(
        &self,
        name: &str,
        original_name: &str,
        data: impl Into<Bytes>,
        content_type: &str,
        opts: &PutOptions,
    ) -> StorageResult<()> {
        let body: Bytes = data.into();
        let client = self.client()?;
        let key = self.key_for(name, opts.target_folder.as_deref())?;
        let attrs = Self::write_attributes(original_name, content_type, opts);
        let size = body.len();

        client.put(&key, body, &attrs).await?;
        debug!("put {} ({} bytes) into {}", key, size, client.bucket());
        Ok(())
    }

    /// Same observable result as [`put`](Self::put), fed from an upload
    /// source. Streams go through the backend's streaming writer; buffered
    /// sources fall back to a plain put.
    pub async fn put_stream(
        &self,
        name: &str,
        original_name: &str,
        source: UploadSource,
        content_type: &str,
        opts: &PutOptions,
    ) -> StorageResult<()> {
        let stream = match source {
            UploadSource::Buffered(bytes) => {
                return self
                    .put(name, original_name, bytes, content_type, opts)
                    .await;
            }
            UploadSource::Stream(stream) => stream,
        };

        let client = self.client()?;
        let key = self.key_for(name, opts.target_folder.as_deref())?;
        let attrs = Self::write_attributes(original_name, content_type, opts);
        client.put_stream(&key, stream, &attrs).await?;
        debug!("stream-put {} into {}", key, client.bucket());
        Ok(())
    }

    /// Handle for one object. The handle caches what it fetches; call
    /// [`ObjectRef::reload`] to force the next access to go to the backend.
    pub fn object(&self, name: &str, folder: Option<&str>) -> StorageResult<ObjectRef> {
        Ok(ObjectRef::new(self.client()?, self.key_for(name, folder)?))
    }

    /// Live existence check.
    pub async fn object_exists(&self, name: &str, folder: Option<&str>) -> StorageResult<bool> {
        self.object(name, folder)?.exists().await
    }

    /// Live fetch of the full object body.
    pub async fn object_data(&self, name: &str, folder: Option<&str>) -> StorageResult<Bytes> {
        self.object(name, folder)?.data().await
    }

    /// Delete exactly one object.
    ///
    /// Deleting a missing object is left to the backend: S3-style services
    /// report success, others may report not-found.
    pub async fn delete(&self, name: &str, folder: Option<&str>) -> StorageResult<()> {
        let client = self.client()?;
        let key = self.key_for(name, folder)?;
        client.delete(&key).await?;
        debug!("deleted {} from {}", key, client.bucket());
        Ok(())
    }

    /// Delete every object whose key starts with `prefix`.
    ///
    /// Not atomic across objects: if the backend fails part-way, objects
    /// deleted so far stay deleted and the error is returned.
    pub async fn batch_delete(&self, prefix: &str) -> StorageResult<usize> {
        let prefix = prefix.trim_start_matches('/');
        let client = self.client()?;
        let deleted = client.delete_prefix(prefix).await?;
        info!(
            "deleted {} objects with prefix `{}` from {}",
            deleted,
            prefix,
            client.bucket()
        );
        Ok(deleted)
    }

    /// Rename `src_name` to `dest_name` inside one folder.
    ///
    /// Returns `false` without touching anything if the source is missing or
    /// the destination already exists. The copy happens on the backend.
    pub async fn move_object(
        &self,
        src_name: &str,
        dest_name: &str,
        folder: Option<&str>,
    ) -> StorageResult<bool> {
        let client = self.client()?;
        let src_key = self.key_for(src_name, folder)?;
        let dest_key = self.key_for(dest_name, folder)?;

        if !client.exists(&src_key).await? {
            debug!("move skipped: source {} missing", src_key);
            return Ok(false);
        }
        if client.exists(&dest_key).await? {
            debug!("move skipped: destination {} exists", dest_key);
            return Ok(false);
        }

        client.relocate(&src_key, &dest_key).await?;
        debug!("moved {} -> {} in {}", src_key, dest_key, client.bucket());
        Ok(true)
    }

    /// Merge `updates` into the object's metadata.
    ///
    /// Keys absent from `updates` are kept, overlapping keys are replaced,
    /// content-type and content-disposition are rewritten unchanged. Returns
    /// `false` if the object does not exist.
    pub async fn update_object_metadata(
        &self,
        name: &str,
        updates: Metadata,
        folder: Option<&str>,
    ) -> StorageResult<bool> {
        let client = self.client()?;
        let key = self.key_for(name, folder)?;
        let Some(head) = client.head(&key).await? else {
            return Ok(false);
        };

        let mut attrs = head.attributes();
        attrs.metadata = metadata::merge(&head.metadata, updates);
        client.rewrite_attributes(&key, &attrs).await?;
        debug!("updated metadata of {} in {}", key, client.bucket());
        Ok(true)
    }

    /// Round trip to the backend to validate credentials and bucket.
    pub async fn verify(&self) -> StorageResult<()> {
        self.client()?.check().await
    }
}

/// `inline; filename=<original_name>` with the name percent-encoded.
pub fn content_disposition(original_name: &str) -> String {
    format!("inline; filename={}", urlencoding::encode(original_name))
}

/// A single object plus whatever has been fetched about it so far.
pub struct ObjectRef {
    client: Arc<dyn ObjectClient>,
    key: String,
    head: tokio::sync::OnceCell<Option<ObjectHead>>,
    body: tokio::sync::OnceCell<Bytes>,
}

impl ObjectRef {
    fn new(client: Arc<dyn ObjectClient>, key: String) -> Self {
        Self {
            client,
            key,
            head: tokio::sync::OnceCell::new(),
            body: tokio::sync::OnceCell::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Object attributes, fetched once per handle.
    pub async fn head(&self) -> StorageResult<Option<&ObjectHead>> {
        let head = self
            .head
            .get_or_try_init(|| self.client.head(&self.key))
            .await?;
        Ok(head.as_ref())
    }

    pub async fn exists(&self) -> StorageResult<bool> {
        Ok(self.head().await?.is_some())
    }

    /// The `digest` metadata entry, if the object has one.
    pub async fn digest(&self) -> StorageResult<Option<String>> {
        Ok(self
            .head()
            .await?
            .and_then(ObjectHead::digest)
            .map(str::to_string))
    }

    /// Full body, fetched once per handle.
    pub async fn data(&self) -> StorageResult<Bytes> {
        self.body
            .get_or_try_init(|| self.client.get(&self.key))
            .await
            .cloned()
    }

    /// Drop cached lookups so the next access hits the backend.
    pub fn reload(&mut self) {
        self.head.take();
        self.body.take();
    }
}

/// Blocking settings read that keeps async worker threads free when it can.
fn read_settings(settings: &SettingsFile) -> StorageResult<StorageConfig> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| settings.load())
        }
        _ => settings.load(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::memory::MemoryClient,
        config::ServiceKind,
        models::metadata::{DIGEST_KEY, sha256_hex},
    };
    use futures::stream;
    use std::io::Write;

    fn connection() -> (StorageConnection, Arc<MemoryClient>) {
        let memory = Arc::new(MemoryClient::new(ServiceKind::S3));
        let storage = StorageConnection::with_client(
            StorageConfig::new("files", ServiceKind::S3),
            memory.clone(),
        );
        (storage, memory)
    }

    #[tokio::test]
    async fn put_then_read_preserves_bytes_and_digest() {
        let (storage, memory) = connection();
        let payload: Vec<u8> = (0u8..=255).collect();
        let digest = sha256_hex(&payload);

        storage
            .put(
                "a1b2c3_report.bin",
                "report.bin",
                payload.clone(),
                "application/octet-stream",
                &PutOptions::default().with_digest(digest.clone()),
            )
            .await
            .unwrap();

        let data = storage.object_data("a1b2c3_report.bin", None).await.unwrap();
        assert_eq!(data.as_ref(), payload.as_slice());

        let stored = memory.object("a1b2c3_report.bin").unwrap();
        assert_eq!(stored.attrs.metadata.get(DIGEST_KEY), Some(&digest));
        assert_eq!(
            stored.attrs.content_type.as_deref(),
            Some("application/octet-stream")
        );
    }

    #[tokio::test]
    async fn put_encodes_original_filename_in_disposition() {
        let (storage, memory) = connection();
        storage
            .put(
                "x",
                "résumé final.pdf",
                Bytes::from_static(b"%PDF"),
                "application/pdf",
                &PutOptions::default(),
            )
            .await
            .unwrap();

        let stored = memory.object("x").unwrap();
        assert_eq!(
            stored.attrs.content_disposition.as_deref(),
            Some("inline; filename=r%C3%A9sum%C3%A9%20final.pdf")
        );
        assert!(stored.attrs.metadata.is_empty());
    }

    #[tokio::test]
    async fn put_uses_configured_and_overridden_folders() {
        let memory = Arc::new(MemoryClient::new(ServiceKind::Gcs));
        let config = StorageConfig {
            folder: Some("attachments".into()),
            ..StorageConfig::new("files", ServiceKind::Gcs)
        };
        let storage = StorageConnection::with_client(config, memory.clone());

        storage
            .put("a", "a", b"1".to_vec(), "text/plain", &PutOptions::default())
            .await
            .unwrap();
        storage
            .put(
                "b",
                "b",
                b"2".to_vec(),
                "text/plain",
                &PutOptions::default().in_folder("thumbs"),
            )
            .await
            .unwrap();

        assert_eq!(memory.keys(), vec!["attachments/a", "thumbs/b"]);
        assert!(storage.object_exists("b", Some("thumbs/")).await.unwrap());
        assert!(!storage.object_exists("b", None).await.unwrap());
    }

    #[tokio::test]
    async fn put_stream_matches_buffered_put() {
        let (storage, memory) = connection();
        let chunks = vec![
            Ok(Bytes::from_static(&[0xff, 0xfe, 0x00])),
            Ok(Bytes::from_static(&[0x80, 0x81])),
        ];

        storage
            .put_stream(
                "streamed",
                "upload.bin",
                UploadSource::from_stream(stream::iter(chunks)),
                "application/octet-stream",
                &PutOptions::default(),
            )
            .await
            .unwrap();
        storage
            .put_stream(
                "buffered",
                "upload.bin",
                UploadSource::from(vec![0xff, 0xfe, 0x00, 0x80, 0x81]),
                "application/octet-stream",
                &PutOptions::default(),
            )
            .await
            .unwrap();

        let streamed = memory.object("streamed").unwrap();
        let buffered = memory.object("buffered").unwrap();
        assert_eq!(streamed.body, buffered.body);
        assert_eq!(streamed.attrs, buffered.attrs);
    }

    #[tokio::test]
    async fn put_stream_surfaces_stream_errors() {
        let (storage, memory) = connection();
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::other("client went away")),
        ];

        let err = storage
            .put_stream(
                "broken",
                "broken",
                UploadSource::from_stream(stream::iter(chunks)),
                "application/octet-stream",
                &PutOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Io(_)));
        assert!(memory.object("broken").is_none());
    }

    #[tokio::test]
    async fn reading_missing_object_is_not_found() {
        let (storage, _memory) = connection();
        let err = storage.object_data("ghost", None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn deleting_missing_object_does_not_crash() {
        let (storage, _memory) = connection();
        let _ = storage.delete("ghost", None).await;
        assert!(!storage.object_exists("ghost", None).await.unwrap());
    }

    #[tokio::test]
    async fn move_refuses_to_clobber_destination() {
        let (storage, memory) = connection();
        let opts = PutOptions::default();
        storage.put("src", "s", b"source".to_vec(), "text/plain", &opts).await.unwrap();
        storage.put("dest", "d", b"dest".to_vec(), "text/plain", &opts).await.unwrap();

        assert!(!storage.move_object("src", "dest", None).await.unwrap());
        assert_eq!(memory.object("src").unwrap().body.as_ref(), b"source");
        assert_eq!(memory.object("dest").unwrap().body.as_ref(), b"dest");
    }

    #[tokio::test]
    async fn move_with_missing_source_returns_false() {
        let (storage, memory) = connection();
        assert!(!storage.move_object("nope", "dest", None).await.unwrap());
        assert!(memory.keys().is_empty());
    }

    #[tokio::test]
    async fn move_renames_within_folder() {
        let (storage, memory) = connection();
        let opts = PutOptions::default().in_folder("imports").with_digest("d1");
        storage
            .put("old.csv", "data.csv", b"a,b\n".to_vec(), "text/csv", &opts)
            .await
            .unwrap();

        assert!(
            storage
                .move_object("old.csv", "new.csv", Some("imports"))
                .await
                .unwrap()
        );
        assert!(memory.object("imports/old.csv").is_none());
        let moved = memory.object("imports/new.csv").unwrap();
        assert_eq!(moved.body.as_ref(), b"a,b\n");
        assert_eq!(moved.attrs.metadata[DIGEST_KEY], "d1");
    }

    #[tokio::test]
    async fn update_metadata_merges_keys() {
        let (storage, memory) = connection();
        storage
            .put(
                "doc",
                "doc.txt",
                b"hello".to_vec(),
                "text/plain",
                &PutOptions::default().with_digest("abc"),
            )
            .await
            .unwrap();

        let updated = storage
            .update_object_metadata(
                "doc",
                Metadata::from([("reviewed".to_string(), "yes".to_string())]),
                None,
            )
            .await
            .unwrap();
        assert!(updated);

        let stored = memory.object("doc").unwrap();
        assert_eq!(stored.attrs.metadata["digest"], "abc");
        assert_eq!(stored.attrs.metadata["reviewed"], "yes");
        assert_eq!(stored.attrs.content_type.as_deref(), Some("text/plain"));
        assert_eq!(
            stored.attrs.content_disposition.as_deref(),
            Some("inline; filename=doc.txt")
        );
        assert_eq!(stored.body.as_ref(), b"hello");

        storage
            .update_object_metadata(
                "doc",
                Metadata::from([("digest".to_string(), "def".to_string())]),
                None,
            )
            .await
            .unwrap();
        let stored = memory.object("doc").unwrap();
        assert_eq!(stored.attrs.metadata["digest"], "def");
        assert_eq!(stored.attrs.metadata["reviewed"], "yes");
    }

    #[tokio::test]
    async fn update_metadata_on_missing_object_returns_false() {
        let (storage, memory) = connection();
        let updated = storage
            .update_object_metadata("ghost", Metadata::new(), None)
            .await
            .unwrap();
        assert!(!updated);
        assert_eq!(memory.writes(), 0);
    }

    #[tokio::test]
    async fn batch_delete_only_touches_matching_prefix() {
        let (storage, memory) = connection();
        let opts = PutOptions::default();
        for name in ["reports/q1.pdf", "reports/q2.pdf", "archive/q1.pdf"] {
            storage.put(name, name, b"x".to_vec(), "application/pdf", &opts).await.unwrap();
        }

        let deleted = storage.batch_delete("reports/").await.unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(memory.keys(), vec!["archive/q1.pdf"]);
    }

    #[tokio::test]
    async fn batch_delete_ignores_leading_slash() {
        let (storage, memory) = connection();
        let opts = PutOptions::default();
        for name in ["/reports/q1.pdf", "archive/q1.pdf"] {
            storage.put(name, name, b"x".to_vec(), "application/pdf", &opts).await.unwrap();
        }

        assert_eq!(storage.batch_delete("/reports/").await.unwrap(), 1);
        assert_eq!(memory.keys(), vec!["archive/q1.pdf"]);
    }

    #[tokio::test]
    async fn object_handle_caches_until_reload() {
        let (storage, _memory) = connection();
        let mut object = storage.object("late", None).unwrap();
        assert!(!object.exists().await.unwrap());

        storage
            .put("late", "late", b"now".to_vec(), "text/plain", &PutOptions::default())
            .await
            .unwrap();
        assert!(!object.exists().await.unwrap());

        object.reload();
        assert!(object.exists().await.unwrap());
        assert_eq!(object.data().await.unwrap().as_ref(), b"now");
    }

    #[tokio::test]
    async fn object_handle_reads_body_once() {
        let (storage, memory) = connection();
        storage
            .put("once", "once", b"1".to_vec(), "text/plain", &PutOptions::default())
            .await
            .unwrap();
        let object = storage.object("once", None).unwrap();
        object.data().await.unwrap();
        object.data().await.unwrap();
        assert_eq!(memory.reads(), 1);
    }

    #[test]
    fn connection_initializes_lazily_from_settings() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(
            b"test:\n  bucket: files\n  region: us-east-1\n  access_key_id: k\n  secret_access_key: s\n  thumb_folder: thumbs\n",
        )
        .unwrap();

        let storage = StorageConnection::from_settings(SettingsFile::new(file.path(), "test"));
        assert_eq!(storage.state(), ConnectionState::Uninitialized);

        assert_eq!(storage.thumb_folder().unwrap(), "thumbs/");
        assert_eq!(storage.state(), ConnectionState::Configured);

        let client = storage.client().unwrap();
        assert_eq!(client.service_kind(), ServiceKind::S3);
        assert_eq!(storage.state(), ConnectionState::Connected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn lazy_settings_load_inside_multi_thread_runtime() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(b"test:\n  bucket: files\n  region: us-east-1\n  folder: docs\n")
            .unwrap();

        let storage = StorageConnection::from_settings(SettingsFile::new(file.path(), "test"));
        assert_eq!(storage.folder().unwrap(), "docs/");
        assert_eq!(storage.state(), ConnectionState::Configured);
    }

    #[tokio::test]
    async fn unreadable_settings_fail_at_first_use() {
        let storage = StorageConnection::from_settings(SettingsFile::new(
            "/nonexistent/storage.yml",
            "test",
        ));
        let err = storage
            .put("a", "a", b"1".to_vec(), "text/plain", &PutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
        assert_eq!(storage.state(), ConnectionState::Uninitialized);
    }

    #[test]
    fn injected_client_starts_connected() {
        let (storage, _memory) = connection();
        assert_eq!(storage.state(), ConnectionState::Connected);
        assert_eq!(storage.folder().unwrap(), "");
        assert_eq!(storage.import_folder().unwrap(), "tmp/");
    }
}
