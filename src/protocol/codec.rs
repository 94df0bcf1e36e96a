//! Frame codec.
//!
//! Pure conversion between typed frames and JSON text. Decoding never panics;
//! anything that does not fit a known frame shape is `MalformedFrame`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;

use super::frame::*;
use crate::error::{RelayError, RelayResult};

/// A decoded inbound message and the connection it came from, when known.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    pub source: Option<String>,
    pub frame: Frame,
}

/// Encode a frame as a text message.
///
/// With a destination the payload is wrapped in a `sendmessage` envelope for
/// the hub; without one the inner data object is sent as is.
pub fn encode(destination: Option<&str>, frame: &Frame) -> String {
    let envelope = match frame {
        Frame::Control(control) => control_envelope(control),
        _ => {
            let data = to_data(frame);
            match destination {
                Some(dest) => Envelope {
                    action: Some(ACTION_SEND_MESSAGE.to_string()),
                    connection_id: Some(dest.to_string()),
                    source_connection_id: None,
                    data: Some(data),
                },
                None => return to_json(&data),
            }
        }
    };
    to_json(&envelope)
}

/// Hub delivery of a peer's payload: `{sourceConnectionId, data}`. The
/// payload is passed through untouched.
pub fn encode_delivery(source: &str, data: &serde_json::Value) -> String {
    serde_json::json!({ "sourceConnectionId": source, "data": data }).to_string()
}

/// Decode a text message from the transport.
pub fn decode(text: &str) -> RelayResult<Delivered> {
    let envelope: Envelope = serde_json::from_str(text).map_err(malformed)?;

    if let Some(control) = envelope.action.as_deref().and_then(|a| {
        parse_control(a, envelope.source_connection_id.as_deref())
    }) {
        return Ok(Delivered {
            source: envelope.source_connection_id,
            frame: Frame::Control(control?),
        });
    }

    let data = match envelope.data {
        Some(data) => data,
        // Direct variant: the message is the inner data object itself.
        None => serde_json::from_str(text).map_err(malformed)?,
    };

    Ok(Delivered {
        source: envelope.source_connection_id,
        frame: from_data(data)?,
    })
}

/// Wire payload of a non-control frame.
pub fn to_data(frame: &Frame) -> FrameData {
    match frame {
        Frame::Request { req_id, request } => {
            let mut wire = WireRequest::from(&request.head);
            wire.body = request.body.as_ref().map(|b| STANDARD.encode(b));
            FrameData {
                req_id: Some(req_id.clone()),
                req: Some(wire),
                ..Default::default()
            }
        }
        Frame::Response { req_id, response } => {
            let mut wire = WireResponse::from(&response.head);
            wire.body = response.body.as_ref().map(|b| STANDARD.encode(b));
            wire.s3_key = response.blob_key.clone();
            FrameData {
                req_id: Some(req_id.clone()),
                res: Some(wire),
                ..Default::default()
            }
        }
        Frame::Chunk {
            req_id,
            index,
            payload,
        } => FrameData {
            req_id: Some(req_id.clone()),
            body_chunk: Some(STANDARD.encode(payload)),
            body_chunk_index: Some(*index),
            ..Default::default()
        },
        Frame::Terminal {
            req_id,
            total_chunks,
            tail,
            head,
        } => {
            let (req, res) = match head {
                StreamHead::Request(h) => (Some(WireRequest::from(h)), None),
                StreamHead::Response(h) => (None, Some(WireResponse::from(h))),
            };
            FrameData {
                req_id: Some(req_id.clone()),
                req,
                res,
                body_chunk: tail.as_ref().map(|(_, b)| STANDARD.encode(b)),
                body_chunk_index: tail.as_ref().map(|(i, _)| *i),
                end_body_chunk: Some(true),
                total_chunks: Some(*total_chunks),
                ..Default::default()
            }
        }
        Frame::Control(Control::Ping) => FrameData {
            action: Some(ACTION_PING.to_string()),
            ..Default::default()
        },
        Frame::Control(Control::Pong) => FrameData {
            action: Some(ACTION_PONG.to_string()),
            ..Default::default()
        },
        Frame::Control(_) => FrameData::default(),
    }
}

/// Typed view of a wire payload.
pub fn from_data(data: FrameData) -> RelayResult<Frame> {
    if let Some(control) = data.action.as_deref().and_then(|a| parse_control(a, None)) {
        return control.map(Frame::Control);
    }

    let req_id = data
        .req_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| RelayError::MalformedFrame("missing reqId".into()))?;

    if data.end_body_chunk == Some(true) {
        let total_chunks = data
            .total_chunks
            .ok_or_else(|| RelayError::MalformedFrame("terminal marker without totalChunks".into()))?;
        let head = match (data.res, data.req) {
            (Some(res), _) => StreamHead::Response(ResponseHead {
                status: res.status,
                headers: res.headers,
            }),
            (None, Some(req)) => StreamHead::Request(req.into()),
            (None, None) => {
                return Err(RelayError::MalformedFrame(
                    "terminal marker without req or res".into(),
                ))
            }
        };
        let tail = match (data.body_chunk, data.body_chunk_index) {
            (Some(chunk), Some(index)) => Some((index, decode_body(&chunk)?)),
            (Some(_), None) => {
                return Err(RelayError::MalformedFrame(
                    "bodyChunk without bodyChunkIndex".into(),
                ))
            }
            _ => None,
        };
        return Ok(Frame::Terminal {
            req_id,
            total_chunks,
            tail,
            head,
        });
    }

    if let Some(chunk) = data.body_chunk {
        let index = data
            .body_chunk_index
            .ok_or_else(|| RelayError::MalformedFrame("bodyChunk without bodyChunkIndex".into()))?;
        return Ok(Frame::Chunk {
            req_id,
            index,
            payload: decode_body(&chunk)?,
        });
    }

    if let Some(res) = data.res {
        let body = res.body.as_deref().map(decode_body).transpose()?;
        return Ok(Frame::Response {
            req_id,
            response: TunneledResponse {
                head: ResponseHead {
                    status: res.status,
                    headers: res.headers,
                },
                body,
                blob_key: res.s3_key.filter(|k| !k.is_empty()),
            },
        });
    }

    if let Some(mut req) = data.req {
        let body = req.body.take().as_deref().map(decode_body).transpose()?;
        return Ok(Frame::Request {
            req_id,
            request: TunneledRequest {
                head: req.into(),
                body,
            },
        });
    }

    Err(RelayError::MalformedFrame(format!(
        "frame for {} carries no req, res or body chunk",
        req_id
    )))
}

fn control_envelope(control: &Control) -> Envelope {
    let (action, source) = match control {
        Control::ClientDisconnect { connection_id } => {
            (ACTION_CLIENT_DISCONNECT, Some(connection_id.clone()))
        }
        Control::ForceClientDisconnect => (ACTION_FORCE_CLIENT_DISCONNECT, None),
        Control::Ping => (ACTION_PING, None),
        Control::Pong => (ACTION_PONG, None),
    };
    Envelope {
        action: Some(action.to_string()),
        source_connection_id: source,
        ..Default::default()
    }
}

/// `None` for actions that are not control notices (`sendmessage`).
fn parse_control(action: &str, source: Option<&str>) -> Option<RelayResult<Control>> {
    let control = match action {
        ACTION_CLIENT_DISCONNECT => match source {
            Some(id) => Ok(Control::ClientDisconnect {
                connection_id: id.to_string(),
            }),
            None => Err(RelayError::MalformedFrame(
                "CLIENT_DISCONNECT without sourceConnectionId".into(),
            )),
        },
        ACTION_FORCE_CLIENT_DISCONNECT => Ok(Control::ForceClientDisconnect),
        ACTION_PING => Ok(Control::Ping),
        ACTION_PONG => Ok(Control::Pong),
        _ => return None,
    };
    Some(control)
}

fn decode_body(encoded: &str) -> RelayResult<Bytes> {
    STANDARD
        .decode(encoded)
        .map(Bytes::from)
        .map_err(|e| RelayError::MalformedFrame(format!("invalid base64 body: {}", e)))
}

fn malformed(e: serde_json::Error) -> RelayError {
    RelayError::MalformedFrame(e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    // Frame structs only hold strings, integers and maps with string keys.
    serde_json::to_string(value).unwrap_or_default()
}
