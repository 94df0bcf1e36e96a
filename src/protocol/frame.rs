//! Frame types.
//!
//! `FrameData` and friends mirror the JSON on the wire field for field.
//! `Frame` is the typed view handlers work with; `codec` converts between
//! the two exactly once at the socket boundary.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::headers::Headers;

pub const ACTION_SEND_MESSAGE: &str = "sendmessage";
pub const ACTION_CLIENT_DISCONNECT: &str = "CLIENT_DISCONNECT";
pub const ACTION_FORCE_CLIENT_DISCONNECT: &str = "FORCE_CLIENT_DISCONNECT";
pub const ACTION_PING: &str = "PING";
pub const ACTION_PONG: &str = "PONG";

/// Outer transport envelope.
///
/// Peers send `{action, connectionId, data}`; the hub delivers
/// `{sourceConnectionId, data}`. Control notices use `action` alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<FrameData>,
}

/// Inner payload of every tunneled message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req: Option<WireRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub res: Option<WireResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_chunk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_chunk_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_body_chunk: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRequest {
    #[serde(default)]
    pub source_ip: String,
    #[serde(default)]
    pub headers: Headers,
    pub original_url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// `body` and `s3Key` are always present on the wire, `null` when unused.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default, rename = "s3Key")]
    pub s3_key: Option<String>,
}

/// Request metadata without a body, carried by a request terminal marker.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHead {
    pub source_ip: String,
    pub headers: Headers,
    pub original_url: String,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TunneledRequest {
    pub head: RequestHead,
    pub body: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Headers,
}

/// A response delivered in one frame. At most one of `body` and `blob_key`
/// is set; neither is set for 304 and other empty responses.
#[derive(Debug, Clone, PartialEq)]
pub struct TunneledResponse {
    pub head: ResponseHead,
    pub body: Option<Bytes>,
    pub blob_key: Option<String>,
}

/// Metadata a terminal marker carries for the stream it closes.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamHead {
    Request(RequestHead),
    Response(ResponseHead),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    /// The named connection left the hub.
    ClientDisconnect { connection_id: String },
    /// This client was displaced by another one claiming the same host.
    ForceClientDisconnect,
    Ping,
    Pong,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Whole request in one frame.
    Request {
        req_id: String,
        request: TunneledRequest,
    },
    /// Whole response in one frame (inline body, blob key, or empty).
    Response {
        req_id: String,
        response: TunneledResponse,
    },
    /// One data chunk of a streamed body.
    Chunk {
        req_id: String,
        index: u32,
        payload: Bytes,
    },
    /// End of a streamed body. `tail` is a final chunk folded into the marker.
    Terminal {
        req_id: String,
        total_chunks: u32,
        tail: Option<(u32, Bytes)>,
        head: StreamHead,
    },
    Control(Control),
}

impl Frame {
    pub fn req_id(&self) -> Option<&str> {
        match self {
            Frame::Request { req_id, .. }
            | Frame::Response { req_id, .. }
            | Frame::Chunk { req_id, .. }
            | Frame::Terminal { req_id, .. } => Some(req_id),
            Frame::Control(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Request { .. } => "request",
            Frame::Response { .. } => "response",
            Frame::Chunk { .. } => "chunk",
            Frame::Terminal { .. } => "terminal",
            Frame::Control(_) => "control",
        }
    }
}

impl From<&RequestHead> for WireRequest {
    fn from(head: &RequestHead) -> Self {
        Self {
            source_ip: head.source_ip.clone(),
            headers: head.headers.clone(),
            original_url: head.original_url.clone(),
            method: head.method.clone(),
            body: None,
        }
    }
}

impl From<&ResponseHead> for WireResponse {
    fn from(head: &ResponseHead) -> Self {
        Self {
            status: head.status,
            headers: head.headers.clone(),
            body: None,
            s3_key: None,
        }
    }
}

impl From<WireRequest> for RequestHead {
    fn from(req: WireRequest) -> Self {
        Self {
            source_ip: req.source_ip,
            headers: req.headers,
            original_url: req.original_url,
            method: req.method,
        }
    }
}
