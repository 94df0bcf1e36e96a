//! Relay session subsystem.
//!
//! # Data Flow
//! ```text
//! ensure_open()
//!     → sign hub URL (clientType, clientForHost, expires, signature)
//!     → tokio-tungstenite connect
//!     → writer task (writer.rs) + read loop (session.rs)
//!
//! Read loop:
//!     text frame → codec decode → PONG / FORCE handled here
//!                               → everything else to FrameHandler
//! ```
//!
//! # Design Decisions
//! - Connection state is owned by a `RelaySession` value, never global
//! - One writer task per socket keeps frame writes atomic
//! - Malformed frames are logged and dropped; the session keeps running

pub mod session;
pub mod writer;

pub use session::{FrameHandler, RelaySession, SessionOptions, SessionState, StopReason};
pub use writer::{FrameWriter, Outgoing};
