//! Blob storage subsystem.
//!
//! # Data Flow
//! ```text
//! Client (overflow path):
//!     local response stream
//!     → HttpBlobStore::put_stream  (PUT /wormholeBlobs/{key})
//!     → gateway FsBlobStore
//!
//! Gateway (response writing):
//!     CorrelatedBody::Blob(key)
//!     → FsBlobStore::get_stream
//!     → HTTP response body
//! ```
//!
//! # Design Decisions
//! - Bodies are streamed end to end; a blob is never buffered whole
//! - Objects keep content-type, content-length and cache-control
//! - Keys are relative paths; `..` segments are rejected

mod fs;
mod http;
mod memory;

pub use fs::FsBlobStore;
pub use http::{HttpBlobStore, CONTENT_LENGTH_HINT};
pub use memory::MemoryBlobStore;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};

/// Streamed object body.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Object metadata kept next to the bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMeta {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content_length: Option<u64>,
    #[serde(default)]
    pub cache_control: Option<String>,
}

pub struct BlobObject {
    pub meta: BlobMeta,
    pub body: ByteStream,
}

impl std::fmt::Debug for BlobObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobObject").field("meta", &self.meta).finish()
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn head_exists(&self, key: &str) -> RelayResult<bool>;

    /// Store `body` under `key`, replacing any previous object. Returns the
    /// number of bytes written.
    async fn put_stream(&self, key: &str, meta: BlobMeta, body: ByteStream) -> RelayResult<u64>;

    async fn get_stream(&self, key: &str) -> RelayResult<BlobObject>;
}

/// Key under which a response body is stored.
pub fn response_key(fingerprint: &str) -> String {
    format!("responses/{}", fingerprint)
}

/// Reject keys that could escape the store root.
pub fn validate_key(key: &str) -> RelayResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(RelayError::Blob(format!("invalid blob key: {:?}", key)));
    }
    Ok(())
}

/// Wrap an in-memory buffer as a single-item stream.
pub fn once_stream(bytes: Bytes) -> ByteStream {
    Box::pin(futures_util::stream::once(async move { Ok(bytes) }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_cannot_escape_the_root() {
        assert!(validate_key("responses/abc123").is_ok());
        for key in ["", "/etc/passwd", "responses/../x", "a//b", "a\\b", "./a"] {
            assert!(validate_key(key).is_err(), "{:?} should be rejected", key);
        }
    }
}
