//! Response delivery over the relay: inline, chunked, or via the blob store.
//!
//! Every flow ends in exactly one resolution: one inline frame, a chunk
//! sequence closed by a terminal marker, or one frame carrying a blob key.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};

use super::forwarder::LocalResponse;
use crate::blob::{response_key, BlobMeta, BlobStore, ByteStream};
use crate::chunker::ChunkSplitter;
use crate::config::schema::DeliveryConfig;
use crate::error::{RelayError, RelayResult};
use crate::observability::metrics;
use crate::protocol::{Frame, Headers, ResponseHead, StreamHead, TunneledResponse};
use crate::relay::FrameWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Inline,
    Chunked,
    Blob,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Inline => "inline",
            Strategy::Chunked => "chunked",
            Strategy::Blob => "blob",
        }
    }
}

fn directives(cache_control: Option<&str>) -> impl Iterator<Item = String> + '_ {
    cache_control
        .unwrap_or_default()
        .split(',')
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty())
}

pub fn select_strategy(
    status: u16,
    headers: &Headers,
    content_length: Option<u64>,
    config: &DeliveryConfig,
) -> Strategy {
    if status == 304 {
        return Strategy::Inline;
    }
    if content_length.is_some_and(|len| len < config.single_frame_threshold as u64) {
        return Strategy::Inline;
    }

    let content_type = headers
        .get("content-type")
        .unwrap_or_default()
        .to_ascii_lowercase();
    let textual = content_type.contains("html") || content_type.contains("json");
    let small = content_length.map_or(true, |len| len < config.streamable_threshold as u64);
    let cache_control = headers.get("cache-control");
    let private = directives(cache_control.as_deref()).any(|d| d == "private" || d == "no-store");

    if (textual && small) || private {
        Strategy::Chunked
    } else {
        Strategy::Blob
    }
}

/// Shared reuse of a stored response needs an ETag and a cache-control that
/// allows shared caching.
pub fn is_cache_eligible(cache_control: Option<&str>, etag: Option<&str>) -> bool {
    if etag.map_or(true, str::is_empty) {
        return false;
    }
    let mut shared = false;
    for directive in directives(cache_control) {
        match directive.as_str() {
            "private" | "no-store" => return false,
            "public" | "no-cache" => shared = true,
            _ => {}
        }
    }
    shared
}

/// `hex(sha256(url + "$$" + etag))`, or the request id when there is no ETag.
pub fn cache_fingerprint(url: &str, etag: Option<&str>, req_id: &str) -> String {
    match etag.filter(|e| !e.is_empty()) {
        Some(etag) => {
            let mut hasher = Sha256::new();
            hasher.update(url.as_bytes());
            hasher.update(b"$$");
            hasher.update(etag.as_bytes());
            hex::encode(hasher.finalize())
        }
        None => req_id.to_string(),
    }
}

/// Sends one flow's response back to the peer that asked for it.
#[derive(Clone)]
pub struct Deliverer {
    writer: FrameWriter,
    destination: String,
    blobs: Arc<dyn BlobStore>,
    config: DeliveryConfig,
    frame_size: usize,
}

impl Deliverer {
    pub fn new(
        writer: FrameWriter,
        destination: impl Into<String>,
        blobs: Arc<dyn BlobStore>,
        config: DeliveryConfig,
        frame_size: usize,
    ) -> Self {
        Self {
            writer,
            destination: destination.into(),
            blobs,
            config,
            frame_size,
        }
    }

    fn send(&self, frame: &Frame) -> RelayResult<()> {
        self.writer.send_frame(Some(&self.destination), frame)
    }

    /// Deliver `response`. On `Err` nothing resolving has been sent yet and
    /// the caller should send [`Deliverer::fail`].
    pub async fn deliver(
        &self,
        req_id: &str,
        original_url: &str,
        response: LocalResponse,
    ) -> RelayResult<Strategy> {
        let strategy = select_strategy(
            response.status,
            &response.headers,
            response.content_length,
            &self.config,
        );
        let mut headers = response.headers;
        headers.strip_hop_by_hop();
        let head = ResponseHead {
            status: response.status,
            headers,
        };
        tracing::debug!(
            req_id,
            status = head.status,
            length = ?response.content_length,
            strategy = strategy.as_str(),
            "Delivering response"
        );

        let delivered = match strategy {
            Strategy::Inline => {
                self.inline(req_id, head, response.body).await?;
                Strategy::Inline
            }
            Strategy::Chunked => {
                match self.chunked(req_id, head.clone(), response.body).await? {
                    None => Strategy::Chunked,
                    Some(rest) => {
                        tracing::info!(
                            req_id,
                            limit = self.config.ws_size_guard(),
                            "Body outgrew the websocket path, falling back to blob store"
                        );
                        self.via_blob(req_id, original_url, head, response.content_length, rest)
                            .await?;
                        Strategy::Blob
                    }
                }
            }
            Strategy::Blob => {
                self.via_blob(req_id, original_url, head, response.content_length, response.body)
                    .await?;
                Strategy::Blob
            }
        };
        metrics::record_delivery(delivered.as_str());
        Ok(delivered)
    }

    /// Synthesized response for a flow that could not be delivered.
    pub fn fail(&self, req_id: &str, error: &RelayError) {
        tracing::warn!(req_id, error = %error, "Sending synthesized error response");
        let frame = Frame::Response {
            req_id: req_id.to_string(),
            response: TunneledResponse {
                head: ResponseHead {
                    status: error.status_code().as_u16(),
                    headers: Headers::new(),
                },
                body: None,
                blob_key: None,
            },
        };
        if let Err(e) = self.send(&frame) {
            tracing::warn!(req_id, error = %e, "Could not send error response");
        }
    }

    async fn inline(&self, req_id: &str, head: ResponseHead, mut body: ByteStream) -> RelayResult<()> {
        let mut buf = BytesMut::new();
        if head.status != 304 {
            while let Some(chunk) = body.next().await {
                buf.extend_from_slice(&chunk?);
            }
        }
        let body = buf.freeze();
        self.send(&Frame::Response {
            req_id: req_id.to_string(),
            response: TunneledResponse {
                head,
                body: (!body.is_empty()).then_some(body),
                blob_key: None,
            },
        })
    }

    /// Stream the body as chunks. Past the size guard, returns everything read
    /// so far followed by the unread remainder, and sends no terminal.
    async fn chunked(
        &self,
        req_id: &str,
        head: ResponseHead,
        mut body: ByteStream,
    ) -> RelayResult<Option<ByteStream>> {
        let guard = self.config.ws_size_guard();
        let mut splitter = ChunkSplitter::new(req_id, self.frame_size);
        let mut seen: Vec<Bytes> = Vec::new();
        let mut total = 0usize;

        while let Some(unit) = body.next().await {
            let unit = unit?;
            total += unit.len();
            seen.push(unit.clone());
            if total > guard {
                let read = futures_util::stream::iter(seen.into_iter().map(Ok));
                return Ok(Some(Box::pin(read.chain(body))));
            }
            for frame in splitter.push(unit) {
                self.send(&frame)?;
            }
        }

        self.send(&splitter.finish(StreamHead::Response(head)))?;
        Ok(None)
    }

    async fn via_blob(
        &self,
        req_id: &str,
        original_url: &str,
        head: ResponseHead,
        content_length: Option<u64>,
        body: ByteStream,
    ) -> RelayResult<()> {
        let etag = head.headers.get("etag");
        let cache_control = head.headers.get("cache-control");
        let key = response_key(&cache_fingerprint(original_url, etag.as_deref(), req_id));

        let reusable = is_cache_eligible(cache_control.as_deref(), etag.as_deref())
            && self.blobs.head_exists(&key).await?;
        if reusable {
            metrics::record_blob_cache_hit();
            tracing::debug!(req_id, key = %key, "Serving stored response");
        } else {
            let meta = BlobMeta {
                content_type: head.headers.get("content-type"),
                content_length,
                cache_control,
            };
            let bytes = self.blobs.put_stream(&key, meta, body).await?;
            tracing::debug!(req_id, key = %key, bytes, "Uploaded response body");
        }

        self.send(&Frame::Response {
            req_id: req_id.to_string(),
            response: TunneledResponse {
                head,
                body: None,
                blob_key: Some(key),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::protocol::encode;
    use crate::relay::Outgoing;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::{json, Value};
    use tokio::sync::mpsc::UnboundedReceiver;

    const BODY: &[u8] = b"0123456789";

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        let mut h = Headers::new();
        for (k, v) in pairs {
            h.insert(k, *v);
        }
        h
    }

    fn deliverer(
        blobs: Arc<MemoryBlobStore>,
        config: DeliveryConfig,
    ) -> (Deliverer, UnboundedReceiver<Outgoing>) {
        let (writer, rx) = FrameWriter::channel();
        (Deliverer::new(writer, "gw", blobs, config, 24 * 1024), rx)
    }

    fn sent(rx: &mut UnboundedReceiver<Outgoing>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(Outgoing::Text(text)) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    fn unknown_length(status: u16, headers: Headers, body: &'static [u8]) -> LocalResponse {
        LocalResponse {
            status,
            headers,
            content_length: None,
            body: crate::blob::once_stream(Bytes::from_static(body)),
        }
    }

    #[test]
    fn strategy_table() {
        let config = DeliveryConfig::default();
        let html = headers(&[("content-type", "text/html; charset=utf-8")]);
        let png = headers(&[("content-type", "image/png")]);
        let private = headers(&[("content-type", "image/png"), ("cache-control", "private, max-age=0")]);

        assert_eq!(select_strategy(304, &png, Some(1 << 20), &config), Strategy::Inline);
        assert_eq!(select_strategy(200, &png, Some(10), &config), Strategy::Inline);
        assert_eq!(select_strategy(200, &html, None, &config), Strategy::Chunked);
        assert_eq!(select_strategy(200, &html, Some(50 * 1024), &config), Strategy::Chunked);
        assert_eq!(select_strategy(200, &html, Some(200 * 1024), &config), Strategy::Blob);
        assert_eq!(select_strategy(200, &png, None, &config), Strategy::Blob);
        assert_eq!(select_strategy(200, &private, None, &config), Strategy::Chunked);
    }

    #[test]
    fn cache_eligibility_requires_etag_and_shared_directive() {
        assert!(is_cache_eligible(Some("public, max-age=60"), Some("\"v1\"")));
        assert!(is_cache_eligible(Some("no-cache"), Some("\"v1\"")));
        assert!(!is_cache_eligible(None, Some("\"v1\"")));
        assert!(!is_cache_eligible(Some("public"), None));
        assert!(!is_cache_eligible(Some("public, no-store"), Some("\"v1\"")));
        assert!(!is_cache_eligible(Some("private, no-cache"), Some("\"v1\"")));
    }

    #[test]
    fn fingerprint_hashes_url_and_etag() {
        let fp = cache_fingerprint("/a.png", Some("\"v1\""), "req");
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, cache_fingerprint("/a.png", Some("\"v1\""), "other"));
        assert_ne!(fp, cache_fingerprint("/a.png", Some("\"v2\""), "req"));
        assert_eq!(cache_fingerprint("/a.png", None, "req"), "req");
    }

    #[tokio::test]
    async fn small_known_length_goes_inline() {
        let (d, mut rx) = deliverer(Arc::new(MemoryBlobStore::new()), DeliveryConfig::default());
        let h = headers(&[("content-type", "application/octet-stream")]);
        let strategy = d
            .deliver("r1", "/x", LocalResponse::buffered(200, h.clone(), BODY))
            .await
            .unwrap();
        assert_eq!(strategy, Strategy::Inline);

        let expected = encode(
            Some("gw"),
            &Frame::Response {
                req_id: "r1".into(),
                response: TunneledResponse {
                    head: ResponseHead { status: 200, headers: h },
                    body: Some(Bytes::from_static(BODY)),
                    blob_key: None,
                },
            },
        );
        let expected: Value = serde_json::from_str(&expected).unwrap();
        assert_eq!(sent(&mut rx), vec![expected.clone()]);
        assert_eq!(expected["data"]["res"]["body"], json!(STANDARD.encode(BODY)));
        assert_eq!(expected["data"]["res"]["s3Key"], Value::Null);
    }

    #[tokio::test]
    async fn private_unknown_length_is_one_folded_terminal() {
        let (d, mut rx) = deliverer(Arc::new(MemoryBlobStore::new()), DeliveryConfig::default());
        let h = headers(&[("cache-control", "private")]);
        let strategy = d.deliver("r1", "/x", unknown_length(200, h, BODY)).await.unwrap();
        assert_eq!(strategy, Strategy::Chunked);

        let frames = sent(&mut rx);
        assert_eq!(frames.len(), 1);
        let data = &frames[0]["data"];
        assert_eq!(data["reqId"], "r1");
        assert_eq!(data["bodyChunkIndex"], 0);
        assert_eq!(data["bodyChunk"], json!(STANDARD.encode(BODY)));
        assert_eq!(data["endBodyChunk"], true);
        assert_eq!(data["totalChunks"], 1);
        assert_eq!(data["res"]["status"], 200);
        assert_eq!(data["res"]["headers"]["cache-control"], "private");
    }

    #[tokio::test]
    async fn stored_response_is_reused_without_upload() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let h = headers(&[
            ("content-type", "image/png"),
            ("etag", "\"v1\""),
            ("cache-control", "public, max-age=60"),
        ]);
        let key = response_key(&cache_fingerprint("/logo.png", Some("\"v1\""), "r1"));
        blobs.insert(&key, BlobMeta::default(), Bytes::from_static(BODY));

        let (d, mut rx) = deliverer(blobs.clone(), DeliveryConfig::default());
        let strategy = d.deliver("r1", "/logo.png", unknown_length(200, h, BODY)).await.unwrap();
        assert_eq!(strategy, Strategy::Blob);
        assert_eq!(blobs.put_count(), 0);

        let frames = sent(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["data"]["res"]["s3Key"], json!(key));
        assert_eq!(frames[0]["data"]["res"]["body"], Value::Null);
    }

    #[tokio::test]
    async fn uncacheable_blob_is_uploaded_under_request_id() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let (d, mut rx) = deliverer(blobs.clone(), DeliveryConfig::default());
        let h = headers(&[("content-type", "image/png")]);
        d.deliver("r9", "/big.png", unknown_length(200, h, BODY)).await.unwrap();

        assert_eq!(blobs.put_count(), 1);
        assert_eq!(blobs.get_bytes("responses/r9").as_deref(), Some(BODY));
        assert_eq!(
            blobs.get_meta("responses/r9").unwrap().content_type.as_deref(),
            Some("image/png")
        );
        assert_eq!(sent(&mut rx)[0]["data"]["res"]["s3Key"], "responses/r9");
    }

    #[tokio::test]
    async fn overflow_falls_back_to_blob_without_losing_bytes() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let config = DeliveryConfig {
            max_ws_size: Some(8),
            ..DeliveryConfig::default()
        };
        let (d, mut rx) = deliverer(blobs.clone(), config);

        let units: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"01234")),
            Ok(Bytes::from_static(b"56789")),
            Ok(Bytes::from_static(b"abc")),
        ];
        let response = LocalResponse {
            status: 200,
            headers: headers(&[("content-type", "application/json")]),
            content_length: None,
            body: Box::pin(futures_util::stream::iter(units)),
        };
        let strategy = d.deliver("r1", "/feed", response).await.unwrap();
        assert_eq!(strategy, Strategy::Blob);
        assert_eq!(blobs.get_bytes("responses/r1").as_deref(), Some(&b"0123456789abc"[..]));

        let frames = sent(&mut rx);
        let resolutions: Vec<&Value> = frames
            .iter()
            .filter(|f| f["data"]["res"].is_object())
            .collect();
        assert_eq!(resolutions.len(), 1);
        assert_eq!(resolutions[0]["data"]["res"]["s3Key"], "responses/r1");
    }

    #[tokio::test]
    async fn not_modified_carries_no_body() {
        let (d, mut rx) = deliverer(Arc::new(MemoryBlobStore::new()), DeliveryConfig::default());
        d.deliver("r1", "/x", unknown_length(304, Headers::new(), b""))
            .await
            .unwrap();
        let frames = sent(&mut rx);
        assert_eq!(frames[0]["data"]["res"]["status"], 304);
        assert_eq!(frames[0]["data"]["res"]["body"], Value::Null);
    }

    #[tokio::test]
    async fn failure_is_a_synthesized_status() {
        let (d, mut rx) = deliverer(Arc::new(MemoryBlobStore::new()), DeliveryConfig::default());
        d.fail("r1", &RelayError::UpstreamFetch("refused".into()));
        let frames = sent(&mut rx);
        assert_eq!(frames[0]["connectionId"], "gw");
        assert_eq!(frames[0]["data"]["res"]["status"], 503);
        assert_eq!(frames[0]["data"]["res"]["headers"], json!({}));
    }
}
