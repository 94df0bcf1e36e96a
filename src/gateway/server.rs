//! Gateway HTTP server: front door, hub endpoint and auxiliary endpoints on
//! one listener.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get};
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use url::Url;

use super::binding::ClientBindings;
use super::endpoints;
use super::tunnel::{tunnel_handler, GatewayFrames};
use crate::blob::{BlobStore, FsBlobStore};
use crate::config::WormholeConfig;
use crate::correlator::Correlator;
use crate::hub::Hub;
use crate::lifecycle::ShutdownSignal;
use crate::registry::{ConnectionRegistry, MemoryRegistry};
use crate::relay::{RelaySession, SessionOptions};
use crate::security::{bearer_auth_middleware, BearerSecret, UrlSigner};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<WormholeConfig>,
    pub registry: Arc<dyn ConnectionRegistry>,
    pub blobs: Arc<dyn BlobStore>,
    pub bindings: ClientBindings,
    pub correlator: Correlator,
    pub hub: Hub,
    /// The gateway's own SERVER connection to the hub.
    pub session: RelaySession,
}

/// The gateway process.
pub struct HttpServer {
    config: Arc<WormholeConfig>,
    registry: Arc<dyn ConnectionRegistry>,
    blobs: Arc<dyn BlobStore>,
}

impl HttpServer {
    /// Gateway with an in-memory registry and a filesystem blob store.
    pub fn new(config: WormholeConfig) -> Self {
        let blobs = Arc::new(FsBlobStore::new(&config.blob.root_dir));
        Self::with_components(config, Arc::new(MemoryRegistry::new()), blobs)
    }

    pub fn with_components(
        config: WormholeConfig,
        registry: Arc<dyn ConnectionRegistry>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            blobs,
        }
    }

    pub fn config(&self) -> &WormholeConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: ShutdownSignal) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        let config = self.config.clone();

        let signer = UrlSigner::new(
            config.auth.secret.as_bytes(),
            Duration::from_secs(config.auth.signed_url_ttl_secs),
        );
        let hub = Hub::new(self.registry.clone(), signer.clone(), config.hub.clone());
        let correlator = Correlator::new();
        let bindings = ClientBindings::new(Duration::from_secs(config.cache.binding_ttl_secs));

        let endpoint = hub_endpoint(addr, &config.hub.path)?;
        let session = RelaySession::new(
            endpoint,
            signer,
            SessionOptions::server(&config.session),
            Arc::new(GatewayFrames {
                correlator: correlator.clone(),
                bindings: bindings.clone(),
            }),
        );

        let state = AppState {
            config: config.clone(),
            registry: self.registry.clone(),
            blobs: self.blobs.clone(),
            bindings,
            correlator,
            hub: hub.clone(),
            session: session.clone(),
        };
        let app = build_router(&config, state, &hub);

        tracing::info!(
            address = %addr,
            hub_path = %config.hub.path,
            "Gateway listening"
        );

        let sweeper = tokio::spawn(hub.clone().run_sweeper(shutdown.clone()));

        let mut signal = shutdown;
        let stop = {
            let hub = hub.clone();
            let session = session.clone();
            async move {
                signal.recv().await;
                tracing::info!("Shutdown signal received");
                session.close();
                hub.close_all();
            }
        };

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(stop)
        .await?;

        let _ = sweeper.await;
        tracing::info!("Gateway stopped");
        Ok(())
    }
}

/// Build the router with all middleware layers.
#[allow(deprecated)]
fn build_router(config: &WormholeConfig, state: AppState, hub: &Hub) -> Router {
    let secret = BearerSecret(Arc::from(config.auth.secret.as_str()));
    let admin = Router::new()
        .route("/wormholeConnections", get(endpoints::list_connections))
        .route("/wormholeConnections/{id}", delete(endpoints::delete_connection))
        .route(
            "/wormholeBlobs/{*key}",
            get(endpoints::get_blob)
                .head(endpoints::head_blob)
                .put(endpoints::put_blob),
        )
        .route_layer(middleware::from_fn_with_state(secret, bearer_auth_middleware));

    Router::new()
        .route("/wormholeConfig", get(endpoints::wormhole_config))
        .merge(admin)
        .fallback(tunnel_handler)
        .with_state(state)
        .merge(hub.router())
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
        .layer(TraceLayer::new_for_http())
}

/// Loopback URL of the hub on this process.
fn hub_endpoint(addr: SocketAddr, path: &str) -> std::io::Result<Url> {
    let ip: IpAddr = if addr.ip().is_unspecified() {
        match addr {
            SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
            SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
        }
    } else {
        addr.ip()
    };
    let url = format!("ws://{}{}", SocketAddr::new(ip, addr.port()), path);
    Url::parse(&url).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_endpoint_uses_loopback_for_wildcard_binds() {
        let url = hub_endpoint("0.0.0.0:8080".parse().unwrap(), "/wormholeWs").unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8080/wormholeWs");

        let url = hub_endpoint("10.1.2.3:9000".parse().unwrap(), "/ws").unwrap();
        assert_eq!(url.as_str(), "ws://10.1.2.3:9000/ws");

        let url = hub_endpoint("[::]:8080".parse().unwrap(), "/wormholeWs").unwrap();
        assert_eq!(url.as_str(), "ws://[::1]:8080/wormholeWs");
    }
}
