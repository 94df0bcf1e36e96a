//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, text or JSON)
//!     → Metrics endpoint (Prometheus scrape, off by default)
//! ```
//!
//! # Design Decisions
//! - Request id flows through gateway, hub and client log events
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
