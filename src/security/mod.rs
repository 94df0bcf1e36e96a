//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Hub WebSocket upgrade:
//!     → signing.rs (verify expires + HMAC signature on the URL)
//!     → accept or 401
//!
//! Admin / blob endpoints:
//!     → bearer.rs (Authorization: Bearer <shared secret>)
//!     → handler or 401
//! ```
//!
//! # Design Decisions
//! - One shared secret signs URLs and authorizes admin calls
//! - Fail closed: reject on any check failure
//! - Secrets and identifiers are compared in constant time

pub mod bearer;
pub mod signing;

pub use bearer::{bearer_auth_middleware, BearerSecret};
pub use signing::{SignatureError, UrlSigner};
