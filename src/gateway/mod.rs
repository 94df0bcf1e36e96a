//! Public gateway.
//!
//! # Data Flow
//! ```text
//! Inbound HTTP (any method/path)
//!     → tunnel.rs (reqId, Host → ClientBindings → registry)
//!     → RelaySession (SERVER peer of the in-process hub)
//!     → Correlator wait (response timeout → 408)
//!     → response written inline, empty, or streamed from the blob store
//!
//! GET  /wormholeConfig             → bootstrap document
//! GET  /wormholeConnections        → registry scan (bearer)
//! DEL  /wormholeConnections/{id}   → force disconnect (bearer)
//! *    /wormholeBlobs/{*key}       → blob store (bearer)
//! GET  /wormholeWs                 → hub upgrade (signed URL)
//! ```
//!
//! # Design Decisions
//! - The gateway talks to clients only through the hub, as a SERVER peer
//! - Bindings are cached per host and scrubbed on CLIENT_DISCONNECT
//! - The relay session is opened lazily and reopened on demand

mod binding;
mod endpoints;
mod server;
mod tunnel;

pub use binding::ClientBindings;
pub use server::{AppState, HttpServer};
