//! In-process `ObjectClient` used by unit tests.

use super::ObjectClient;
use crate::{
    config::ServiceKind,
    errors::{StorageError, StorageResult},
    models::object::{ByteStream, ObjectAttributes, ObjectHead},
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::{
    collections::BTreeMap,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub attrs: ObjectAttributes,
}

pub struct MemoryClient {
    kind: ServiceKind,
    bucket: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryClient {
    pub fn new(kind: ServiceKind) -> Self {
        Self {
            kind,
            bucket: "memory".to_string(),
            objects: Mutex::new(BTreeMap::new()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn store(&self, key: &str, body: Bytes, attrs: &ObjectAttributes) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body,
                attrs: attrs.clone(),
            },
        );
    }

    fn not_found(&self, key: &str) -> StorageError {
        StorageError::ObjectNotFound {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectClient for MemoryClient {
    fn service_kind(&self) -> ServiceKind {
        self.kind
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, body: Bytes, attrs: &ObjectAttributes) -> StorageResult<()> {
        self.store(key, body, attrs);
        Ok(())
    }

    async fn put_stream(
        &self,
        key: &str,
        mut body: ByteStream,
        attrs: &ObjectAttributes,
    ) -> StorageResult<()> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        self.store(key, buffer.freeze(), attrs);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.object(key)
            .map(|object| object.body)
            .ok_or_else(|| self.not_found(key))
    }

    async fn head(&self, key: &str) -> StorageResult<Option<ObjectHead>> {
        Ok(self.object(key).map(|object| ObjectHead {
            key: key.to_string(),
            size: object.body.len() as u64,
            content_type: object.attrs.content_type.clone(),
            content_disposition: object.attrs.content_disposition.clone(),
            etag: None,
            metadata: object.attrs.metadata.clone(),
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn relocate(&self, src: &str, dest: &str) -> StorageResult<()> {
        let mut objects = self.objects.lock().unwrap();
        let object = objects.remove(src).ok_or_else(|| self.not_found(src))?;
        objects.insert(dest.to_string(), object);
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let mut objects = self.objects.lock().unwrap();
        let before = objects.len();
        objects.retain(|key, _| !key.starts_with(prefix));
        Ok(before - objects.len())
    }

    async fn rewrite_attributes(&self, key: &str, attrs: &ObjectAttributes) -> StorageResult<()> {
        let body = self
            .object(key)
            .map(|object| object.body)
            .ok_or_else(|| self.not_found(key))?;
        self.store(key, body, attrs);
        Ok(())
    }

    async fn check(&self) -> StorageResult<()> {
        Ok(())
    }
}
