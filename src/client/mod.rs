//! Wormhole client: the process running next to a private server.
//!
//! # Data Flow
//! ```text
//! GET /wormholeConfig → host key, hub endpoint, blob endpoint
//!     → conflict check (/wormholeConnections?host=) → --force deletes holder
//!     → RelaySession (CLIENT, clientForHost=<host>)
//!
//! request frame(s) → listener.rs (reassembly arena)
//!     → forwarder.rs (local server, no redirects)
//!     → delivery.rs (inline | chunked | blob) → same socket
//! ```

pub mod bootstrap;
pub mod delivery;
pub mod forwarder;
pub mod listener;

pub use bootstrap::{BootstrapError, GatewayApi};
pub use delivery::{cache_fingerprint, is_cache_eligible, select_strategy, Deliverer, Strategy};
pub use forwarder::{LocalForwarder, LocalResponse};
pub use listener::TunnelClient;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::blob::HttpBlobStore;
use crate::chunker::ReassemblyArena;
use crate::config::WormholeConfig;
use crate::error::RelayError;
use crate::lifecycle::ShutdownSignal;
use crate::relay::{RelaySession, SessionOptions, StopReason};
use crate::security::UrlSigner;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error("no shared secret configured (set WORMHOLE_SECRET)")]
    MissingSecret,

    #[error("{host} is already served by connection {connection_id}; rerun with --force to take it over")]
    HostClaimed { host: String, connection_id: String },

    #[error("invalid hub endpoint {0:?}")]
    InvalidHubEndpoint(String),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// How to reach the local server and what to claim.
#[derive(Debug, Clone)]
pub struct ListenOptions {
    pub endpoint: String,
    pub local_port: u16,
    pub local_host: String,
    pub scheme: String,
    pub force: bool,
}

/// Why `listen` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenOutcome {
    /// Another client took over the host.
    Displaced,
    /// Shutdown was requested locally.
    Interrupted,
}

/// Claim the gateway's host and serve tunneled requests until displaced or
/// shut down.
pub async fn listen(
    options: &ListenOptions,
    config: &WormholeConfig,
    mut shutdown: ShutdownSignal,
) -> Result<ListenOutcome, ClientError> {
    let secret = config.auth.secret.clone();
    if secret.is_empty() {
        return Err(ClientError::MissingSecret);
    }

    let api = GatewayApi::new(&options.endpoint)?;
    let bootstrap = api.fetch_bootstrap().await?;
    tracing::info!(
        host = %bootstrap.host,
        ws_endpoint = %bootstrap.ws_endpoint,
        bucket = %bootstrap.bucket,
        "Fetched wormhole config"
    );
    let api = api.with_token(secret.clone());

    for holder in api.connections(Some(&bootstrap.host)).await? {
        if !options.force {
            return Err(ClientError::HostClaimed {
                host: bootstrap.host.clone(),
                connection_id: holder.connection_id,
            });
        }
        tracing::warn!(
            host = %bootstrap.host,
            connection_id = %holder.connection_id,
            "Displacing existing client"
        );
        api.force_disconnect(&holder.connection_id).await?;
    }

    let hub = Url::parse(&bootstrap.ws_endpoint)
        .map_err(|_| ClientError::InvalidHubEndpoint(bootstrap.ws_endpoint.clone()))?;
    let forwarder = LocalForwarder::new(
        &options.scheme,
        &options.local_host,
        options.local_port,
        Duration::from_secs(config.delivery.local_timeout_secs),
    )?;
    let tunnel = TunnelClient::new(
        forwarder,
        Arc::new(HttpBlobStore::new(&bootstrap.bucket, secret.clone())),
        config.delivery.clone(),
        config.relay.frame_size,
        ReassemblyArena::new(config.relay.max_pending_flows, config.relay.reassembly_max_age()),
    );
    tokio::spawn(
        tunnel
            .clone()
            .run_sweeper(config.relay.reassembly_max_age(), shutdown.clone()),
    );

    let signer = UrlSigner::new(
        secret.as_bytes(),
        Duration::from_secs(config.auth.signed_url_ttl_secs),
    );
    let session = RelaySession::new(
        hub,
        signer,
        SessionOptions::client(bootstrap.host.clone(), &config.session),
        Arc::new(tunnel),
    );
    session.ensure_open().await?;
    tracing::info!(
        host = %bootstrap.host,
        local = %format!("{}://{}:{}", options.scheme, options.local_host, options.local_port),
        "Wormhole open"
    );

    tokio::select! {
        reason = session.stopped() => Ok(match reason {
            StopReason::Displaced => ListenOutcome::Displaced,
            StopReason::Closed => ListenOutcome::Interrupted,
        }),
        _ = shutdown.recv() => {
            session.close();
            Ok(ListenOutcome::Interrupted)
        }
    }
}
