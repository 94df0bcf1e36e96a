//! Request correlation subsystem (gateway side).
//!
//! # Data Flow
//! ```text
//! Inbound HTTP request
//!     → Correlator::register(reqId) → PendingResponse
//!     → request frames go out over the relay session
//!
//! Relay session read loop
//!     → Correlator::dispatch(frame)
//!     → every listener compares reqId in constant time
//!     → matching listener buffers chunks / resolves
//!
//! PendingResponse::wait(timeout)
//!     → CorrelatedResponse | ResponseTimeout
//! ```
//!
//! # Design Decisions
//! - One shared socket serves every flow; non-matching frames pass through untouched
//! - A resolved flag guarded by the same lock as the result channel makes a
//!   resolve racing the timeout land on exactly one side
//! - Listener deregistration is tied to `PendingResponse` drop, so both the
//!   success and timeout paths release it

mod pending;

pub use pending::{CorrelatedBody, CorrelatedResponse, Correlator, PendingResponse};
