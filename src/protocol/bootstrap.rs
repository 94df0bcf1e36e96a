use serde::{Deserialize, Serialize};

/// Client bootstrap document served at `GET /wormholeConfig`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WormholeBootstrap {
    /// Hub WebSocket endpoint, e.g. `wss://gw.example.com/wormholeWs`.
    pub ws_endpoint: String,
    /// Base URL of the blob store endpoint.
    pub bucket: String,
    pub region: String,
    /// Host key the client claims: the Host the gateway was reached on.
    pub host: String,
}
