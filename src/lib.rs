//! Wormhole: HTTP tunneling over a persistent WebSocket.
//!
//! A public gateway accepts HTTP requests and relays them through a WebSocket
//! hub to a client process running next to a private server. The client
//! proxies each request to its local server and sends the response back over
//! the same socket.

pub mod blob;
pub mod chunker;
pub mod client;
pub mod config;
pub mod correlator;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod lifecycle;
pub mod observability;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod resilience;
pub mod security;

pub use config::schema::WormholeConfig;
pub use error::{RelayError, RelayResult};
pub use gateway::HttpServer;
pub use lifecycle::Shutdown;
