//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Relay session closed unexpectedly:
//!     → backoff.rs (delay for this attempt)
//!     → reconnect
//!     → on open: reset attempts
//! ```
//!
//! # Design Decisions
//! - Reconnection is indefinite; only a forced disconnect stops it
//! - Every external call has a deadline (response window, local fetch timeout)

pub mod backoff;

pub use backoff::{calculate_backoff, ReconnectBackoff};
