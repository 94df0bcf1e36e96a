//! Directory-backed blob store used by the gateway.
//!
//! Each object is a file under the root plus a `.meta.json` sidecar. Writes
//! go to a temporary file that is renamed into place, so readers never see a
//! partial object.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, StreamReader};

use super::{validate_key, BlobMeta, BlobObject, BlobStore, ByteStream};
use crate::error::{RelayError, RelayResult};

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> RelayResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn meta_path(object: &Path) -> PathBuf {
    let mut name = object.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn head_exists(&self, key: &str) -> RelayResult<bool> {
        let path = self.object_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn put_stream(&self, key: &str, mut meta: BlobMeta, body: ByteStream) -> RelayResult<u64> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        let written = {
            let mut file = tokio::fs::File::create(&tmp).await?;
            let mut reader = StreamReader::new(body);
            let copied = tokio::io::copy(&mut reader, &mut file).await;
            match copied {
                Ok(n) => {
                    file.flush().await?;
                    n
                }
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&tmp).await;
                    return Err(e.into());
                }
            }
        };

        meta.content_length = Some(written);
        let sidecar = serde_json::to_vec(&meta).map_err(|e| RelayError::Blob(e.to_string()))?;
        tokio::fs::write(meta_path(&path), sidecar).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(key = %key, bytes = written, "Stored blob");
        Ok(written)
    }

    async fn get_stream(&self, key: &str) -> RelayResult<BlobObject> {
        let path = self.object_path(key)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RelayError::BlobNotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let meta = match tokio::fs::read(meta_path(&path)).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_default(),
            Err(_) => BlobMeta::default(),
        };

        Ok(BlobObject {
            meta,
            body: Box::pin(ReaderStream::new(file)),
        })
    }
}
