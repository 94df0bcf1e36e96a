//! WebSocket hub.
//!
//! # Data Flow
//! ```text
//! GET /wormholeWs?clientType=..&clientForHost=..&expires=..&signature=..
//!     → verify signature → registry put (409 on a claimed host) → upgrade
//!
//! {"action":"PING"}                         → {"action":"PONG"} + TTL refresh
//! {"action":"sendmessage","connectionId",d} → {"sourceConnectionId",d} to peer
//!                                             + TTL refresh
//! socket closed                             → registry delete
//!                                           → CLIENT_DISCONNECT to SERVER peers
//! ```
//!
//! # Design Decisions
//! - The hub never interprets `data`; it routes by connection id only
//! - Posting to a vanished peer deletes its registry entry and is otherwise
//!   ignored
//! - Expired entries are swept on an interval and their sockets closed

mod socket;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;

use crate::config::schema::HubConfig;
use crate::error::{RelayError, RelayResult};
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::protocol::frame::{ACTION_PING, ACTION_PONG, ACTION_SEND_MESSAGE};
use crate::protocol::{encode, encode_delivery, Control, Frame};
use crate::registry::{ConnectionEntry, ConnectionRegistry, Role};
use crate::relay::FrameWriter;
use crate::security::UrlSigner;

/// What a peer sends to the hub. `data` stays opaque.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerMessage {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl PeerMessage {
    fn is_ping(&self) -> bool {
        self.action.as_deref() == Some(ACTION_PING)
            || self
                .data
                .as_ref()
                .and_then(|d| d.get("action"))
                .and_then(|a| a.as_str())
                == Some(ACTION_PING)
    }
}

struct Peer {
    role: Role,
    writer: FrameWriter,
}

struct HubInner {
    registry: Arc<dyn ConnectionRegistry>,
    signer: UrlSigner,
    config: HubConfig,
    peers: DashMap<String, Peer>,
}

/// Shared hub state. Cloning is cheap.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new(registry: Arc<dyn ConnectionRegistry>, signer: UrlSigner, config: HubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                registry,
                signer,
                config,
                peers: DashMap::new(),
            }),
        }
    }

    /// Router serving the upgrade endpoint at the configured path.
    pub fn router(&self) -> axum::Router {
        socket::router(self.clone())
    }

    pub fn registry(&self) -> &Arc<dyn ConnectionRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Sockets currently attached.
    pub fn connection_count(&self) -> usize {
        self.inner.peers.len()
    }

    fn attach(&self, entry: &ConnectionEntry, writer: FrameWriter) {
        self.inner.peers.insert(
            entry.connection_id.clone(),
            Peer {
                role: entry.role,
                writer,
            },
        );
        metrics::record_hub_connections(self.inner.peers.len());
        tracing::info!(
            connection_id = %entry.connection_id,
            role = %entry.role,
            host = ?entry.host_key,
            "Peer connected"
        );
    }

    /// Forget a closed socket and tell gateways when a client left.
    async fn detach(&self, connection_id: &str) {
        let role = self
            .inner
            .peers
            .remove(connection_id)
            .map(|(_, peer)| {
                peer.writer.close();
                peer.role
            });
        metrics::record_hub_connections(self.inner.peers.len());

        let entry = match self.inner.registry.delete(connection_id).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(connection_id, error = %e, "Failed to delete registry entry");
                None
            }
        };
        let role = role.or(entry.map(|e| e.role));
        tracing::info!(connection_id, role = ?role, "Peer disconnected");

        if role == Some(Role::Client) {
            self.broadcast_client_disconnect(connection_id).await;
        }
    }

    async fn broadcast_client_disconnect(&self, connection_id: &str) {
        let servers = match self.inner.registry.scan_all().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Registry scan failed, skipping disconnect broadcast");
                return;
            }
        };
        let notice = encode(
            None,
            &Frame::Control(Control::ClientDisconnect {
                connection_id: connection_id.to_string(),
            }),
        );
        for server in servers.into_iter().filter(|e| e.role == Role::Server) {
            if let Err(e) = self
                .post_to_connection(&server.connection_id, notice.clone())
                .await
            {
                tracing::debug!(error = %e, "Disconnect notice not delivered");
            }
        }
    }

    /// Handle one text message from `source`.
    async fn on_text(&self, source: &str, writer: &FrameWriter, text: &str) {
        let message: PeerMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                metrics::record_frame_dropped("malformed");
                tracing::warn!(connection_id = source, error = %e, "Dropping malformed message");
                return;
            }
        };

        if message.is_ping() {
            tracing::debug!(connection_id = source, "<< PING");
            let _ = writer.send_frame(None, &Frame::Control(Control::Pong));
            self.touch(source, self.inner.config.ping_ttl_secs).await;
            return;
        }
        // Any traffic keeps the sender alive; SERVER peers never PING.
        self.touch(source, self.inner.config.connection_ttl_secs).await;

        match message.action.as_deref() {
            Some(ACTION_SEND_MESSAGE) => {
                let (Some(destination), Some(data)) = (message.connection_id, message.data) else {
                    metrics::record_frame_dropped("unroutable");
                    tracing::warn!(connection_id = source, "sendmessage without connectionId or data");
                    return;
                };
                let delivery = encode_delivery(source, &data);
                if let Err(e) = self.post_to_connection(&destination, delivery).await {
                    metrics::record_frame_dropped("stale");
                    tracing::debug!(connection_id = source, error = %e, "Delivery dropped");
                }
            }
            Some(ACTION_PONG) => {}
            other => {
                metrics::record_frame_dropped("unroutable");
                tracing::debug!(connection_id = source, action = ?other, "Ignoring message");
            }
        }
    }

    async fn touch(&self, connection_id: &str, ttl_secs: u64) {
        let ttl = Duration::from_secs(ttl_secs);
        if let Err(e) = self.inner.registry.refresh_ttl(connection_id, ttl).await {
            tracing::warn!(connection_id, error = %e, "TTL refresh failed");
        }
    }

    /// Queue `text` on a peer's socket. An unknown or closed peer has its
    /// registry entry removed.
    pub async fn post_to_connection(&self, connection_id: &str, text: String) -> RelayResult<()> {
        let writer = self
            .inner
            .peers
            .get(connection_id)
            .map(|peer| peer.writer.clone());
        if let Some(writer) = writer {
            if writer.send_text(text).is_ok() {
                return Ok(());
            }
        }
        let _ = self.inner.registry.delete(connection_id).await;
        Err(RelayError::StaleConnection {
            connection_id: connection_id.to_string(),
        })
    }

    /// Remove a connection's entry, send it FORCE_CLIENT_DISCONNECT and
    /// close its socket.
    pub async fn force_disconnect(&self, connection_id: &str) -> RelayResult<Option<ConnectionEntry>> {
        let entry = self.inner.registry.delete(connection_id).await?;
        let writer = self
            .inner
            .peers
            .get(connection_id)
            .map(|peer| peer.writer.clone());
        if let Some(writer) = writer {
            tracing::info!(connection_id, "Forcing client disconnect");
            let _ = writer.send_frame(None, &Frame::Control(Control::ForceClientDisconnect));
            writer.close();
        }
        Ok(entry)
    }

    /// Drop expired registry entries and close their sockets.
    pub async fn sweep(&self) -> usize {
        let expired = match self.inner.registry.sweep_expired().await {
            Ok(expired) => expired,
            Err(e) => {
                tracing::warn!(error = %e, "Registry sweep failed");
                return 0;
            }
        };
        for entry in &expired {
            if let Some(peer) = self.inner.peers.get(&entry.connection_id) {
                peer.writer.close();
            }
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Swept expired connections");
        }
        expired.len()
    }

    /// Run `sweep` every `sweep_interval_secs` until shutdown.
    pub async fn run_sweeper(self, mut shutdown: ShutdownSignal) {
        let period = Duration::from_secs(self.inner.config.sweep_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    /// Close every attached socket.
    pub fn close_all(&self) {
        for peer in self.inner.peers.iter() {
            peer.writer.close();
        }
    }
}
