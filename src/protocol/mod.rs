//! Wire protocol subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound:
//!     Frame (typed)
//!     → codec.rs (FrameData, base64 body fields)
//!     → Envelope {action: "sendmessage", connectionId, data}
//!     → UTF-8 JSON text frame
//!
//! Inbound (delivered by the hub):
//!     {sourceConnectionId, data} | {action: CONTROL, ...}
//!     → codec.rs (decode once at the boundary)
//!     → Delivered { source, Frame }
//! ```
//!
//! # Design Decisions
//! - One JSON shape for every message in both directions
//! - Binary content is base64 inside JSON string fields
//! - Frame kinds are a tagged union; handlers never inspect optional fields
//! - Decoding failures surface as `MalformedFrame` and are dropped by sessions

pub mod bootstrap;
pub mod codec;
pub mod frame;
pub mod headers;

pub use bootstrap::WormholeBootstrap;
pub use codec::{decode, encode, encode_delivery, Delivered};
pub use frame::{
    Control, Frame, FrameData, RequestHead, ResponseHead, StreamHead, TunneledRequest,
    TunneledResponse,
};
pub use headers::Headers;
