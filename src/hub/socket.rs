//! Upgrade endpoint and per-socket loop.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Router};
use futures_util::StreamExt;

use super::Hub;
use crate::error::RelayError;
use crate::registry::{ConnectionEntry, Role};
use crate::relay::writer::{pump, FrameWriter};

const CLIENT_TYPE: &str = "clientType";
const CLIENT_FOR_HOST: &str = "clientForHost";
const CONNECTION_ID_LEN: usize = 16;

pub(super) fn router(hub: Hub) -> Router {
    let path = hub.config().path.clone();
    Router::new().route(&path, get(upgrade)).with_state(hub)
}

async fn upgrade(
    State(hub): State<Hub>,
    uri: Uri,
    headers: HeaderMap,
    peer: Option<Extension<ConnectInfo<SocketAddr>>>,
    ws: WebSocketUpgrade,
) -> Response {
    let pairs: Vec<(String, String)> = uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    if let Err(e) = hub.inner.signer.verify(uri.path(), &pairs) {
        tracing::warn!(error = %e, "Rejected unsigned hub connection");
        return RelayError::from(e).into_response();
    }

    let param = |name: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };
    let role: Role = match param(CLIENT_TYPE).unwrap_or_default().parse() {
        Ok(role) => role,
        Err(e) => return RelayError::MalformedFrame(e).into_response(),
    };
    let host_key = param(CLIENT_FOR_HOST).filter(|h| !h.is_empty());
    if role == Role::Client && host_key.is_none() {
        return RelayError::MalformedFrame("CLIENT connection without clientForHost".into())
            .into_response();
    }

    let source_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| peer.map(|Extension(ConnectInfo(addr))| addr.ip().to_string()))
        .unwrap_or_default();

    let entry = ConnectionEntry::new(
        connection_id(),
        role,
        host_key,
        source_ip,
        Duration::from_secs(hub.config().connection_ttl_secs),
    );
    if let Err(e) = hub.registry().put(entry.clone()).await {
        tracing::warn!(host = ?entry.host_key, error = %e, "Rejected hub connection");
        return e.into_response();
    }

    let claim = Claim::new(hub.clone(), &entry.connection_id);
    ws.on_failed_upgrade(|e| tracing::warn!(error = %e, "Hub upgrade failed"))
        .on_upgrade(move |socket| serve(hub, socket, entry, claim))
}

/// Registry entry written before the handshake finished. Dropped without
/// `keep`, the entry is deleted again so a failed upgrade does not hold the
/// host.
struct Claim {
    hub: Hub,
    connection_id: Option<String>,
}

impl Claim {
    fn new(hub: Hub, connection_id: &str) -> Self {
        Self {
            hub,
            connection_id: Some(connection_id.to_string()),
        }
    }

    fn keep(mut self) {
        self.connection_id = None;
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        let Some(connection_id) = self.connection_id.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let registry = self.hub.registry().clone();
        runtime.spawn(async move {
            tracing::debug!(connection_id = %connection_id, "Releasing unused registry claim");
            if let Err(e) = registry.delete(&connection_id).await {
                tracing::warn!(connection_id = %connection_id, error = %e, "Failed to release claim");
            }
        });
    }
}

async fn serve(hub: Hub, socket: WebSocket, entry: ConnectionEntry, claim: Claim) {
    claim.keep();
    let (sink, mut stream) = socket.split();
    let (writer, rx) = FrameWriter::channel();
    tokio::spawn(pump(
        rx,
        sink,
        |t| Message::Text(t.into()),
        || Message::Close(None),
    ));
    hub.attach(&entry, writer.clone());

    let id = entry.connection_id.as_str();
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => hub.on_text(id, &writer, text.as_str()).await,
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => hub.on_text(id, &writer, text).await,
                Err(_) => tracing::debug!(connection_id = id, "Ignoring binary message"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(connection_id = id, error = %e, "Socket read failed");
                break;
            }
        }
        if writer.is_closed() {
            break;
        }
    }

    hub.detach(id).await;
}

fn connection_id() -> String {
    std::iter::repeat_with(fastrand::alphanumeric)
        .take(CONNECTION_ID_LEN)
        .collect()
}
