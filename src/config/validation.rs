//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Cross-field checks (router timeout outlasts the response window)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: WormholeConfig → Result<(), Vec<ValidationError>>

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::WormholeConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &WormholeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_body_bytes", "must be > 0"));
    }

    if config.relay.response_timeout_secs == 0 {
        errors.push(ValidationError::new("relay.response_timeout_secs", "must be > 0"));
    }
    if config.relay.frame_size < 2 {
        errors.push(ValidationError::new("relay.frame_size", "must be at least 2 bytes"));
    }
    if config.relay.max_pending_flows == 0 {
        errors.push(ValidationError::new("relay.max_pending_flows", "must be > 0"));
    }
    if config.timeouts.request_secs <= config.relay.response_timeout_secs {
        errors.push(ValidationError::new(
            "timeouts.request_secs",
            "must be greater than relay.response_timeout_secs",
        ));
    }

    if config.session.reconnect_max_ms < config.session.reconnect_base_ms {
        errors.push(ValidationError::new(
            "session.reconnect_max_ms",
            "must be >= session.reconnect_base_ms",
        ));
    }
    if config.session.inactivity_secs == 0 {
        errors.push(ValidationError::new("session.inactivity_secs", "must be > 0"));
    }
    if config.session.heartbeat_secs == 0 {
        errors.push(ValidationError::new("session.heartbeat_secs", "must be > 0"));
    }

    if !config.hub.path.starts_with('/') {
        errors.push(ValidationError::new("hub.path", "must start with '/'"));
    }
    if config.hub.connection_ttl_secs == 0 || config.hub.ping_ttl_secs == 0 {
        errors.push(ValidationError::new("hub", "ttl values must be > 0"));
    }
    if config.hub.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("hub.sweep_interval_secs", "must be > 0"));
    }

    if config.delivery.single_frame_threshold > config.delivery.streamable_threshold {
        errors.push(ValidationError::new(
            "delivery.single_frame_threshold",
            "must not exceed delivery.streamable_threshold",
        ));
    }

    if config.auth.secret.is_empty() {
        errors.push(ValidationError::new(
            "auth.secret",
            "required (set it in the file or WORMHOLE_SECRET)",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "not a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
