//! Multi-node routing layer: the ring-backed client and its
//! failover-aware variant, plus their shared `Router` trait so the cache
//! facade (`crate::cache::Cache`) can be generic over either.

pub mod failover_client;
pub mod ring_client;

pub use failover_client::FailoverClient;
pub use ring_client::RingClient;

use crate::error::Result;

/// The operations [`crate::cache::Cache`] needs from a routing client,
/// implemented by both [`RingClient`] and [`FailoverClient`] so the facade
/// does not care which variant backs it.
pub trait Router: Send + Sync {
    fn route_get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn route_set(&self, key: &str, value: &[u8], nx: bool, ex: Option<u64>) -> Result<bool>;
    fn route_exists(&self, key: &str) -> Result<bool>;
    fn route_incrby(&self, key: &str, delta: i64) -> Result<i64>;
    fn route_delete(&self, keys: &[String]) -> Result<u64>;
    fn route_delete_tag(&self, tags: &[String]) -> Result<u64>;
    fn route_mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;
    fn route_keys(&self, pattern: &str) -> Result<Vec<String>>;
    fn route_flushdb(&self) -> Result<()>;
    fn route_ping(&self) -> Result<std::collections::HashMap<String, bool>>;
}
