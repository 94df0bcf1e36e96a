use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures_util::StreamExt;

use super::{once_stream, validate_key, BlobMeta, BlobObject, BlobStore, ByteStream};
use crate::error::{RelayError, RelayResult};

/// Blob store held in process memory. Counts uploads so callers can assert
/// that a cached object was reused.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<DashMap<String, (BlobMeta, Bytes)>>,
    puts: Arc<AtomicUsize>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without counting it as an upload.
    pub fn insert(&self, key: &str, meta: BlobMeta, bytes: Bytes) {
        self.objects.insert(key.to_string(), (meta, bytes));
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn get_bytes(&self, key: &str) -> Option<Bytes> {
        self.objects.get(key).map(|o| o.value().1.clone())
    }

    pub fn get_meta(&self, key: &str) -> Option<BlobMeta> {
        self.objects.get(key).map(|o| o.value().0.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn head_exists(&self, key: &str) -> RelayResult<bool> {
        Ok(self.objects.contains_key(key))
    }

    async fn put_stream(&self, key: &str, mut meta: BlobMeta, mut body: ByteStream) -> RelayResult<u64> {
        validate_key(key)?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let written = buf.len() as u64;
        meta.content_length = Some(written);
        self.objects.insert(key.to_string(), (meta, buf.freeze()));
        Ok(written)
    }

    async fn get_stream(&self, key: &str) -> RelayResult<BlobObject> {
        let (meta, bytes) = self
            .objects
            .get(key)
            .map(|o| o.value().clone())
            .ok_or_else(|| RelayError::BlobNotFound(key.to_string()))?;
        Ok(BlobObject {
            meta,
            body: once_stream(bytes),
        })
    }
}
