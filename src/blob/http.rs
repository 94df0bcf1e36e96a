//! Blob store client for the gateway's `/wormholeBlobs` endpoint.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::{header, StatusCode};

use super::{validate_key, BlobMeta, BlobObject, BlobStore, ByteStream};
use crate::error::{RelayError, RelayResult};

/// Declared body length for streamed uploads.
pub const CONTENT_LENGTH_HINT: &str = "x-blob-content-length";

#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpBlobStore {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, key: &str) -> RelayResult<String> {
        validate_key(key)?;
        Ok(format!("{}/{}", self.base_url, key))
    }
}

fn transport(e: reqwest::Error) -> RelayError {
    RelayError::Blob(e.to_string())
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn head_exists(&self, key: &str) -> RelayResult<bool> {
        let response = self
            .client
            .head(self.url(key)?)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport)?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(RelayError::Blob(format!("HEAD {} returned {}", key, s))),
        }
    }

    async fn put_stream(&self, key: &str, meta: BlobMeta, body: ByteStream) -> RelayResult<u64> {
        let mut request = self
            .client
            .put(self.url(key)?)
            .bearer_auth(&self.token)
            .body(reqwest::Body::wrap_stream(body));
        if let Some(ct) = &meta.content_type {
            request = request.header(header::CONTENT_TYPE, ct);
        }
        if let Some(cc) = &meta.cache_control {
            request = request.header(header::CACHE_CONTROL, cc);
        }
        if let Some(len) = meta.content_length {
            request = request.header(CONTENT_LENGTH_HINT, len.to_string());
        }

        let response = request.send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(RelayError::Blob(format!(
                "PUT {} returned {}",
                key,
                response.status()
            )));
        }

        #[derive(serde::Deserialize)]
        struct Stored {
            bytes: u64,
        }
        let stored: Stored = response.json().await.map_err(transport)?;
        Ok(stored.bytes)
    }

    async fn get_stream(&self, key: &str) -> RelayResult<BlobObject> {
        let response = self
            .client
            .get(self.url(key)?)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport)?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(RelayError::BlobNotFound(key.to_string())),
            s if !s.is_success() => {
                return Err(RelayError::Blob(format!("GET {} returned {}", key, s)))
            }
            _ => {}
        }

        let header_str = |name: header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let meta = BlobMeta {
            content_type: header_str(header::CONTENT_TYPE),
            content_length: response.content_length(),
            cache_control: header_str(header::CACHE_CONTROL),
        };

        let body = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(BlobObject {
            meta,
            body: Box::pin(body),
        })
    }
}
