//! Shared utilities for the tunnel integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use wormhole::blob::MemoryBlobStore;
use wormhole::client::{listen, ClientError, ListenOptions, ListenOutcome};
use wormhole::registry::{ConnectionRegistry, MemoryRegistry};
use wormhole::{HttpServer, Shutdown, WormholeConfig};

pub const SECRET: &str = "integration-secret";

/// A running gateway plus handles on its in-memory state.
pub struct Gateway {
    pub addr: SocketAddr,
    pub registry: Arc<MemoryRegistry>,
    pub blobs: Arc<MemoryBlobStore>,
    pub shutdown: Shutdown,
}

impl Gateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Host key the gateway derives for requests sent to `addr`.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    /// Poll until a CLIENT holds this gateway's host key.
    pub async fn wait_for_client(&self) -> String {
        for _ in 0..100 {
            if let Ok(Some(entry)) = self.registry.query_by_host_key(&self.host()).await {
                return entry.connection_id;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("no client registered for {}", self.host());
    }
}

pub fn test_config(addr: SocketAddr) -> WormholeConfig {
    let mut config = WormholeConfig::default();
    config.listener.bind_address = addr.to_string();
    config.auth.secret = SECRET.to_string();
    config.relay.response_timeout_secs = 5;
    config.timeouts.request_secs = 10;
    config.session.reconnect_base_ms = 50;
    config.session.reconnect_max_ms = 200;
    config
}

pub async fn start_gateway(config: WormholeConfig) -> Gateway {
    let addr: SocketAddr = config.listener.bind_address.parse().unwrap();
    let listener = TcpListener::bind(addr).await.unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let shutdown = Shutdown::new();

    let server = HttpServer::with_components(config, registry.clone(), blobs.clone());
    let signal = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, signal).await;
    });

    Gateway {
        addr,
        registry,
        blobs,
        shutdown,
    }
}

/// A running `wormhole listen`.
pub struct Client {
    pub shutdown: Shutdown,
    pub task: JoinHandle<Result<ListenOutcome, ClientError>>,
}

pub fn start_client(gateway: &Gateway, local_port: u16, force: bool) -> Client {
    let options = ListenOptions {
        endpoint: format!("http://{}", gateway.addr),
        local_port,
        local_host: "127.0.0.1".to_string(),
        scheme: "http".to_string(),
        force,
    };
    let config = test_config(gateway.addr);
    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let task = tokio::spawn(async move { listen(&options, &config, signal).await });
    Client { shutdown, task }
}

/// Start a local server that answers every request with a raw HTTP/1.1
/// response head and body.
pub async fn start_raw_local(addr: SocketAddr, head: &'static str, body: &'static str) {
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;
                        let response = format!("{}Connection: close\r\n\r\n{}", head, body);
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Start a local axum server with `/test`, `/echo` and `/json/{n}`.
pub async fn start_local_app(addr: SocketAddr) {
    use axum::body::{Body, Bytes};
    use axum::extract::Path;
    use axum::http::header;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};

    let listener = TcpListener::bind(addr).await.unwrap();
    let app = axum::Router::new()
        .route("/test", get(|| async { "test" }))
        .route(
            "/echo",
            post(|body: Bytes| async move {
                ([(header::CONTENT_TYPE, "application/octet-stream")], body)
            }),
        )
        .route(
            "/json/{n}",
            get(|Path(n): Path<usize>| async move {
                let items: Vec<String> = (0..n).map(|i| format!("\"item-{:06}\"", i)).collect();
                let json = format!("[{}]", items.join(","));
                // A stream body leaves the length unknown to the client.
                let stream = futures_util::stream::iter(
                    json.into_bytes()
                        .chunks(8192)
                        .map(|c| Ok::<_, std::io::Error>(Bytes::copy_from_slice(c)))
                        .collect::<Vec<_>>(),
                );
                (
                    [(header::CONTENT_TYPE, "application/json")],
                    Body::from_stream(stream),
                )
                    .into_response()
            }),
        );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
}

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}
