use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Process in front of a private server; claims a host key.
    Client,
    /// Gateway relay session.
    Server,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "CLIENT",
            Role::Server => "SERVER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CLIENT" => Ok(Role::Client),
            "SERVER" => Ok(Role::Server),
            other => Err(format!("unknown client type: {}", other)),
        }
    }
}

/// One WebSocket connection known to the hub. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEntry {
    pub connection_id: String,
    pub role: Role,
    /// Set only for CLIENT connections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_key: Option<String>,
    #[serde(default)]
    pub source_ip: String,
    pub created_at: u64,
    pub updated_at: u64,
    pub expires_at: u64,
}

impl ConnectionEntry {
    pub fn new(
        connection_id: impl Into<String>,
        role: Role,
        host_key: Option<String>,
        source_ip: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let now = unix_now();
        Self {
            connection_id: connection_id.into(),
            role,
            host_key: host_key.map(|h| h.to_ascii_lowercase()),
            source_ip: source_ip.into(),
            created_at: now,
            updated_at: now,
            expires_at: now + ttl.as_secs(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at < unix_now()
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
