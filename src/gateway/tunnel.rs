//! Tunneling handler: every request that is not a wormhole endpoint.
//!
//! ```text
//! request → reqId → host binding → relay session → send req (inline or chunked)
//!         → correlator wait → response (inline, empty, or streamed from blob)
//! ```

use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use super::server::AppState;
use crate::chunker::chunk_body;
use crate::correlator::{CorrelatedBody, CorrelatedResponse, Correlator};
use crate::error::{RelayError, RelayResult};
use crate::observability::metrics;
use crate::protocol::{Control, Delivered, Frame, Headers, RequestHead, StreamHead, TunneledRequest};
use crate::relay::{FrameHandler, FrameWriter};

use super::binding::ClientBindings;

/// Headers a request id is taken from, in order.
const REQUEST_ID_HEADERS: [&str; 3] = ["x-amzn-trace-id", "x-trace-id", "x-request-id"];

pub(super) fn request_id(headers: &HeaderMap) -> String {
    REQUEST_ID_HEADERS
        .iter()
        .find_map(|name| {
            headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
        })
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

pub(super) fn source_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}

/// Frames arriving on the gateway's relay session.
pub(super) struct GatewayFrames {
    pub correlator: Correlator,
    pub bindings: ClientBindings,
}

impl FrameHandler for GatewayFrames {
    fn on_frame(&self, delivered: Delivered, _writer: &FrameWriter) {
        match &delivered.frame {
            Frame::Control(Control::ClientDisconnect { connection_id }) => {
                self.bindings.scrub_connection(connection_id);
            }
            Frame::Control(_) => {}
            frame => {
                if self.correlator.dispatch(frame) == 0 {
                    metrics::record_frame_dropped("unmatched");
                    tracing::debug!(
                        req_id = ?frame.req_id(),
                        kind = frame.kind(),
                        "No listener for frame"
                    );
                }
            }
        }
    }
}

pub(super) async fn tunnel_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let req_id = request_id(request.headers());

    let response = match relay(&state, peer, request, &req_id).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(req_id = %req_id, error = %e, "Tunneled request failed");
            e.into_response()
        }
    };
    metrics::record_request(&method, response.status().as_u16(), start);
    response
}

async fn relay(
    state: &AppState,
    peer: SocketAddr,
    request: Request<Body>,
    req_id: &str,
) -> RelayResult<Response> {
    let (parts, body) = request.into_parts();
    let host = parts
        .headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.host())
        .unwrap_or_default()
        .to_string();

    let binding = state
        .bindings
        .resolve(state.registry.as_ref(), &host)
        .await?;

    let body = axum::body::to_bytes(body, state.config.listener.max_body_bytes)
        .await
        .map_err(|_| RelayError::PayloadTooLarge)?;

    let head = RequestHead {
        source_ip: source_ip(&parts.headers, peer),
        headers: Headers::from_header_map(&parts.headers),
        original_url: parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        method: parts.method.to_string(),
    };

    tracing::debug!(
        req_id,
        host = %host,
        connection_id = %binding.connection_id,
        method = %head.method,
        url = %head.original_url,
        bytes = body.len(),
        "Tunneling request"
    );

    let writer = state.session.ensure_open().await?;
    // Registered before the first frame leaves so a fast reply is not missed.
    let pending = state.correlator.register(req_id);
    for frame in request_frames(req_id, head, body, state.config.relay.frame_size) {
        writer.send_frame(Some(&binding.connection_id), &frame)?;
    }

    let response = pending.wait(state.config.relay.response_timeout()).await?;
    render(state, response).await
}

/// One inline frame for bodies that fit, otherwise chunks closed by a
/// terminal carrying the request head.
fn request_frames(req_id: &str, head: RequestHead, body: Bytes, frame_size: usize) -> Vec<Frame> {
    if body.len() <= frame_size {
        vec![Frame::Request {
            req_id: req_id.to_string(),
            request: TunneledRequest {
                head,
                body: (!body.is_empty()).then_some(body),
            },
        }]
    } else {
        chunk_body(req_id, body, frame_size, StreamHead::Request(head))
    }
}

async fn render(state: &AppState, response: CorrelatedResponse) -> RelayResult<Response> {
    let status = StatusCode::from_u16(response.status)
        .map_err(|_| RelayError::MalformedFrame(format!("invalid status {}", response.status)))?;
    let mut headers = response.headers;
    headers.strip_hop_by_hop();
    headers.remove("transfer-encoding");

    let body = match response.body {
        CorrelatedBody::Inline(bytes) => {
            headers.remove("content-length");
            Body::from(bytes)
        }
        CorrelatedBody::Empty => {
            headers.remove("content-length");
            Body::empty()
        }
        CorrelatedBody::Blob(key) => {
            let object = state.blobs.get_stream(&key).await?;
            if !headers.contains("content-type") {
                if let Some(content_type) = object.meta.content_type {
                    headers.insert("content-type", content_type);
                }
            }
            match object.meta.content_length {
                Some(len) => headers.insert("content-length", len.to_string()),
                None => {
                    headers.remove("content-length");
                }
            }
            Body::from_stream(object.body)
        }
    };

    let mut out = Response::new(body);
    *out.status_mut() = status;
    *out.headers_mut() = headers.to_header_map();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn head() -> RequestHead {
        RequestHead {
            source_ip: "1.2.3.4".into(),
            headers: Headers::new(),
            original_url: "/upload".into(),
            method: "POST".into(),
        }
    }

    #[test]
    fn request_id_prefers_trace_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("third"));
        headers.insert("x-trace-id", HeaderValue::from_static("REQUESTID"));
        assert_eq!(request_id(&headers), "REQUESTID");

        headers.insert("x-amzn-trace-id", HeaderValue::from_static("Root=1-abc"));
        assert_eq!(request_id(&headers), "Root=1-abc");

        let generated = request_id(&HeaderMap::new());
        assert!(uuid::Uuid::parse_str(&generated).is_ok());
    }

    #[test]
    fn source_ip_uses_first_forwarded_hop() {
        let peer: SocketAddr = "10.0.0.9:4000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(source_ip(&headers, peer), "10.0.0.9");
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(source_ip(&headers, peer), "203.0.113.7");
    }

    #[test]
    fn small_bodies_travel_inline() {
        let frames = request_frames("r1", head(), Bytes::from_static(b"hello"), 16);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Request { request, .. } => {
                assert_eq!(request.body.as_deref(), Some(&b"hello"[..]))
            }
            other => panic!("unexpected {:?}", other),
        }

        let frames = request_frames("r2", head(), Bytes::new(), 16);
        assert!(matches!(&frames[0], Frame::Request { request, .. } if request.body.is_none()));
    }

    #[test]
    fn large_bodies_are_chunked_with_request_terminal() {
        let body = Bytes::from(vec![7u8; 40]);
        let frames = request_frames("r1", head(), body, 16);
        assert!(frames.len() > 1);
        match frames.last() {
            Some(Frame::Terminal {
                head: StreamHead::Request(h),
                ..
            }) => assert_eq!(h.original_url, "/upload"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn gateway_frames_scrub_on_client_disconnect() {
        use crate::registry::{ConnectionEntry, ConnectionRegistry, MemoryRegistry, Role};

        let registry = MemoryRegistry::new();
        let entry = ConnectionEntry::new(
            "gone",
            Role::Client,
            Some("host.com".into()),
            "",
            std::time::Duration::from_secs(60),
        );
        registry.put(entry).await.unwrap();
        let bindings = ClientBindings::new(std::time::Duration::from_secs(60));
        bindings.resolve(&registry, "host.com").await.unwrap();

        let frames = GatewayFrames {
            correlator: Correlator::new(),
            bindings: bindings.clone(),
        };
        let (writer, _rx) = FrameWriter::channel();
        frames.on_frame(
            Delivered {
                source: None,
                frame: Frame::Control(Control::ClientDisconnect {
                    connection_id: "gone".into(),
                }),
            },
            &writer,
        );
        assert!(bindings.is_empty());
    }
}
