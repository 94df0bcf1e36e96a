//! Connection registry subsystem.
//!
//! # Data Flow
//! ```text
//! Hub connect     → put(entry)            (conditional per host key)
//! Hub PING        → refresh_ttl(id)
//! Hub disconnect  → delete(id)
//! Gateway lookup  → query_by_host_key(host)
//! Admin listing   → scan_all()
//! Periodic sweep  → sweep_expired()
//! ```
//!
//! # Design Decisions
//! - Storage sits behind the `ConnectionRegistry` trait; the gateway and hub
//!   only see the trait object
//! - At most one live CLIENT entry per host key, enforced at write time
//! - Expired entries are invisible to lookups before the sweep removes them

mod entry;
mod memory;

pub use entry::{unix_now, ConnectionEntry, Role};
pub use memory::MemoryRegistry;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::RelayResult;

#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Insert or replace an entry. A CLIENT entry for a host key held by
    /// another live connection fails with `HostClaimed`.
    async fn put(&self, entry: ConnectionEntry) -> RelayResult<()>;

    async fn get(&self, connection_id: &str) -> RelayResult<Option<ConnectionEntry>>;

    /// Remove an entry, returning it if it existed.
    async fn delete(&self, connection_id: &str) -> RelayResult<Option<ConnectionEntry>>;

    /// The live CLIENT entry for a host key.
    async fn query_by_host_key(&self, host_key: &str) -> RelayResult<Option<ConnectionEntry>>;

    async fn scan_all(&self) -> RelayResult<Vec<ConnectionEntry>>;

    /// Push the expiry of an entry out to `now + ttl`. `false` if unknown.
    async fn refresh_ttl(&self, connection_id: &str, ttl: Duration) -> RelayResult<bool>;

    /// Remove expired entries and return them.
    async fn sweep_expired(&self) -> RelayResult<Vec<ConnectionEntry>>;
}
