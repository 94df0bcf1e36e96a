//! Host → client connection cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::{RelayError, RelayResult};
use crate::registry::{ConnectionEntry, ConnectionRegistry};

struct Binding {
    entry: ConnectionEntry,
    cached_at: Instant,
}

/// Registry lookups cached per host for `ttl`.
///
/// Concurrent misses for one host may both hit the registry and both write
/// the cache; the writes are identical so the race is harmless.
#[derive(Clone)]
pub struct ClientBindings {
    bindings: Arc<DashMap<String, Binding>>,
    ttl: Duration,
}

impl ClientBindings {
    pub fn new(ttl: Duration) -> Self {
        Self {
            bindings: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// The client connection serving `host`.
    pub async fn resolve(
        &self,
        registry: &dyn ConnectionRegistry,
        host: &str,
    ) -> RelayResult<ConnectionEntry> {
        let host = host.to_ascii_lowercase();
        let cached = self
            .bindings
            .get(&host)
            .filter(|b| b.cached_at.elapsed() < self.ttl)
            .map(|b| b.entry.clone());
        if let Some(entry) = cached {
            return Ok(entry);
        }

        match registry.query_by_host_key(&host).await? {
            Some(entry) => {
                tracing::debug!(host = %host, connection_id = %entry.connection_id, "Bound host");
                self.bindings.insert(
                    host,
                    Binding {
                        entry: entry.clone(),
                        cached_at: Instant::now(),
                    },
                );
                Ok(entry)
            }
            None => {
                self.bindings.remove(&host);
                Err(RelayError::NoClientListening { host })
            }
        }
    }

    /// Drop every binding that points at `connection_id`.
    pub fn scrub_connection(&self, connection_id: &str) -> usize {
        let before = self.bindings.len();
        self.bindings
            .retain(|_, b| b.entry.connection_id != connection_id);
        let scrubbed = before.saturating_sub(self.bindings.len());
        if scrubbed > 0 {
            tracing::info!(connection_id, scrubbed, "Scrubbed bindings for departed client");
        }
        scrubbed
    }

    pub fn invalidate(&self, host: &str) {
        self.bindings.remove(&host.to_ascii_lowercase());
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
