//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway
//! and the client. Every section is defaulted, so an empty file is valid
//! apart from the shared secret.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunker::DEFAULT_FRAME_SIZE;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WormholeConfig {
    /// Public HTTP listener.
    pub listener: ListenerConfig,

    /// Correlation and framing on the gateway side.
    pub relay: RelayConfig,

    /// Relay session liveness and reconnection.
    pub session: SessionConfig,

    /// WebSocket hub.
    pub hub: HubConfig,

    /// Gateway-side client binding cache.
    pub cache: CacheConfig,

    /// Client-side response delivery thresholds.
    pub delivery: DeliveryConfig,

    /// Blob storage for large bodies.
    pub blob: BlobConfig,

    /// Shared secret and URL signing.
    pub auth: AuthConfig,

    /// Router-level timeouts.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest inbound request body accepted for tunneling.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// How long an inbound request waits for its tunneled response.
    pub response_timeout_secs: u64,

    /// Maximum chunk payload per WebSocket frame, in bytes.
    pub frame_size: usize,

    /// Upper bound on concurrently reassembled request bodies (client side).
    pub max_pending_flows: usize,

    /// Incomplete reassemblies older than this are dropped.
    pub reassembly_max_age_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            response_timeout_secs: 25,
            frame_size: DEFAULT_FRAME_SIZE,
            max_pending_flows: 1024,
            reassembly_max_age_secs: 60,
        }
    }
}

impl RelayConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn reassembly_max_age(&self) -> Duration {
        Duration::from_secs(self.reassembly_max_age_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,

    /// Close the socket after this long without an inbound message.
    pub inactivity_secs: u64,

    /// Heartbeat period for long-lived client sessions.
    pub heartbeat_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: 1000,
            reconnect_max_ms: 1000,
            inactivity_secs: 300,
            heartbeat_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HubConfig {
    /// Path of the WebSocket upgrade endpoint.
    pub path: String,

    /// Endpoint advertised to clients in `/wormholeConfig`. Derived from the
    /// request's Host header when unset.
    pub public_ws_endpoint: Option<String>,

    /// Lifetime of a fresh registry entry.
    pub connection_ttl_secs: u64,

    /// Lifetime granted by a PING.
    pub ping_ttl_secs: u64,

    pub sweep_interval_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            path: "/wormholeWs".to_string(),
            public_ws_endpoint: None,
            connection_ttl_secs: 3600,
            ping_ttl_secs: 900,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub binding_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            binding_ttl_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Responses with a known length below this go out as one inline frame.
    pub single_frame_threshold: usize,

    /// HTML/JSON responses below this (or of unknown length) are streamed
    /// over the socket.
    pub streamable_threshold: usize,

    /// Size guard for the WebSocket path; past it the body overflows to the
    /// blob store. Defaults to `streamable_threshold`.
    pub max_ws_size: Option<usize>,

    /// Timeout for the call to the local server.
    pub local_timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            single_frame_threshold: DEFAULT_FRAME_SIZE,
            streamable_threshold: 100 * 1024,
            max_ws_size: None,
            local_timeout_secs: 10,
        }
    }
}

impl DeliveryConfig {
    pub fn ws_size_guard(&self) -> usize {
        self.max_ws_size.unwrap_or(self.streamable_threshold)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Directory the gateway stores blobs in.
    pub root_dir: String,

    /// Base URL of the blob endpoint advertised as `bucket`. Derived from the
    /// request's Host header when unset.
    pub public_url: Option<String>,

    pub region: String,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            root_dir: "./wormhole-blobs".to_string(),
            public_url: None,
            region: "local".to_string(),
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret. Overridden by `WORMHOLE_SECRET`.
    pub secret: String,

    pub signed_url_ttl_secs: u64,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("signed_url_ttl_secs", &self.signed_url_ttl_secs)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            signed_url_ttl_secs: 300,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time for one inbound request, enforced by the router.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines.
    pub log_json: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
