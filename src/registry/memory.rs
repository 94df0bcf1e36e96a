//! In-process registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{unix_now, ConnectionEntry, ConnectionRegistry, Role};
use crate::error::{RelayError, RelayResult};

/// Registry backed by two concurrent maps: entries by connection id and the
/// claiming connection id by host key.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    entries: Arc<DashMap<String, ConnectionEntry>>,
    hosts: Arc<DashMap<String, String>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn holder_is_live(&self, connection_id: &str) -> bool {
        self.entries
            .get(connection_id)
            .map(|e| !e.is_expired())
            .unwrap_or(false)
    }

    fn remove_entry(&self, connection_id: &str) -> Option<ConnectionEntry> {
        let (_, entry) = self.entries.remove(connection_id)?;
        if let Some(host) = &entry.host_key {
            self.hosts.remove_if(host, |_, holder| holder == connection_id);
        }
        Some(entry)
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryRegistry {
    async fn put(&self, entry: ConnectionEntry) -> RelayResult<()> {
        if let (Role::Client, Some(host)) = (entry.role, entry.host_key.clone()) {
            let displaced = match self.hosts.entry(host.clone()) {
                Entry::Occupied(mut claimed) => {
                    let holder = claimed.get().clone();
                    if holder != entry.connection_id && self.holder_is_live(&holder) {
                        return Err(RelayError::HostClaimed {
                            host,
                            connection_id: holder,
                        });
                    }
                    claimed.insert(entry.connection_id.clone());
                    Some(holder).filter(|h| h != &entry.connection_id)
                }
                Entry::Vacant(slot) => {
                    slot.insert(entry.connection_id.clone());
                    None
                }
            };
            if let Some(stale) = displaced {
                self.entries.remove(&stale);
            }
        }
        self.entries.insert(entry.connection_id.clone(), entry);
        Ok(())
    }

    async fn get(&self, connection_id: &str) -> RelayResult<Option<ConnectionEntry>> {
        Ok(self.entries.get(connection_id).map(|e| e.value().clone()))
    }

    async fn delete(&self, connection_id: &str) -> RelayResult<Option<ConnectionEntry>> {
        Ok(self.remove_entry(connection_id))
    }

    async fn query_by_host_key(&self, host_key: &str) -> RelayResult<Option<ConnectionEntry>> {
        let host = host_key.to_ascii_lowercase();
        let Some(holder) = self.hosts.get(&host).map(|h| h.value().clone()) else {
            return Ok(None);
        };
        Ok(self
            .entries
            .get(&holder)
            .map(|e| e.value().clone())
            .filter(|e| !e.is_expired()))
    }

    async fn scan_all(&self) -> RelayResult<Vec<ConnectionEntry>> {
        let mut all: Vec<ConnectionEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.connection_id.cmp(&b.connection_id)));
        Ok(all)
    }

    async fn refresh_ttl(&self, connection_id: &str, ttl: Duration) -> RelayResult<bool> {
        match self.entries.get_mut(connection_id) {
            Some(mut entry) => {
                let now = unix_now();
                entry.updated_at = now;
                entry.expires_at = now + ttl.as_secs();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn sweep_expired(&self) -> RelayResult<Vec<ConnectionEntry>> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.is_expired())
            .map(|e| e.key().clone())
            .collect();
        Ok(expired
            .iter()
            .filter_map(|id| self.remove_entry(id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn client(id: &str, host: &str) -> ConnectionEntry {
        ConnectionEntry::new(id, Role::Client, Some(host.into()), "127.0.0.1", HOUR)
    }

    #[tokio::test]
    async fn second_client_for_host_is_refused() {
        let registry = MemoryRegistry::new();
        registry.put(client("a", "host.com")).await.unwrap();

        let err = registry.put(client("b", "HOST.com")).await.unwrap_err();
        assert!(matches!(err, RelayError::HostClaimed { ref connection_id, .. } if connection_id == "a"));

        let found = registry.query_by_host_key("host.com").await.unwrap().unwrap();
        assert_eq!(found.connection_id, "a");
    }

    #[tokio::test]
    async fn delete_frees_the_host() {
        let registry = MemoryRegistry::new();
        registry.put(client("a", "host.com")).await.unwrap();
        assert!(registry.delete("a").await.unwrap().is_some());
        assert!(registry.query_by_host_key("host.com").await.unwrap().is_none());

        registry.put(client("b", "host.com")).await.unwrap();
        assert_eq!(
            registry.query_by_host_key("host.com").await.unwrap().unwrap().connection_id,
            "b"
        );
    }

    #[tokio::test]
    async fn expired_holder_can_be_replaced() {
        let registry = MemoryRegistry::new();
        let mut stale = client("a", "host.com");
        stale.expires_at = 0;
        registry.put(stale).await.unwrap();
        assert!(registry.query_by_host_key("host.com").await.unwrap().is_none());

        registry.put(client("b", "host.com")).await.unwrap();
        assert!(registry.get("a").await.unwrap().is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn servers_do_not_claim_hosts() {
        let registry = MemoryRegistry::new();
        registry
            .put(ConnectionEntry::new("s1", Role::Server, None, "10.0.0.1", HOUR))
            .await
            .unwrap();
        registry
            .put(ConnectionEntry::new("s2", Role::Server, None, "10.0.0.2", HOUR))
            .await
            .unwrap();
        assert_eq!(registry.scan_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn refresh_and_sweep() {
        let registry = MemoryRegistry::new();
        let mut old = client("a", "one.com");
        old.expires_at = 0;
        registry.put(old).await.unwrap();
        registry.put(client("b", "two.com")).await.unwrap();

        assert!(registry.refresh_ttl("b", Duration::from_secs(900)).await.unwrap());
        assert!(!registry.refresh_ttl("missing", HOUR).await.unwrap());

        let swept = registry.sweep_expired().await.unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].connection_id, "a");
        assert_eq!(registry.len(), 1);
        let b = registry.get("b").await.unwrap().unwrap();
        assert!(b.expires_at <= unix_now() + 900);
    }
}
