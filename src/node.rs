//! The downstream driver contract.
//!
//! The single-node KV protocol itself is an external collaborator: this
//! crate only defines the typed dispatch surface a driver must expose.
//! This replaces dynamic `__getattr__`-based method resolution with an
//! explicit trait, since late-bound dispatch is an anti-pattern for a
//! typed rewrite.

pub use crate::ring::NodeName;

/// A single-node KV driver implementing the primitive command set in the
/// external interface table: `GET`, `SET`, `DEL`, `EXISTS`, `INCRBY`,
/// `MGET`, `KEYS`, `FLUSHDB`, `DBSIZE`, `INFO`, `PING`, `EXPIRE`, the
/// `H*` map analogs, and `SCRIPT LOAD`/`EVALSHA`.
///
/// Implementations own their own connection pooling; the core only
/// requires each handle be long-lived and closed exactly once. Must be
/// `Send + Sync` since the routing client may fan out broadcast/multi-key
/// operations across nodes in parallel.
pub trait NodeDriver: Send + Sync {
    fn get(&self, key: &str) -> crate::error::Result<Option<Vec<u8>>>;
    fn set(
        &self,
        key: &str,
        value: &[u8],
        nx: bool,
        ex: Option<u64>,
    ) -> crate::error::Result<bool>;
    fn getset(&self, key: &str, value: &[u8]) -> crate::error::Result<Option<Vec<u8>>>;
    fn del(&self, keys: &[String]) -> crate::error::Result<u64>;
    fn exists(&self, key: &str) -> crate::error::Result<bool>;
    fn incrby(&self, key: &str, delta: i64) -> crate::error::Result<i64>;
    fn expire(&self, key: &str, ttl: u64) -> crate::error::Result<bool>;
    fn mget(&self, keys: &[String]) -> crate::error::Result<Vec<Option<Vec<u8>>>>;
    fn keys(&self, pattern: &str) -> crate::error::Result<Vec<String>>;

    fn hget(&self, bucket: &str, field: &str) -> crate::error::Result<Option<Vec<u8>>>;
    fn hset(&self, bucket: &str, field: &str, value: &[u8], nx: bool) -> crate::error::Result<bool>;
    fn hmget(&self, bucket: &str, fields: &[String]) -> crate::error::Result<Vec<Option<Vec<u8>>>>;
    fn hdel(&self, bucket: &str, fields: &[String]) -> crate::error::Result<u64>;
    fn hexists(&self, bucket: &str, field: &str) -> crate::error::Result<bool>;
    fn hincrby(&self, bucket: &str, field: &str, delta: i64) -> crate::error::Result<i64>;
    fn hlen(&self, bucket: &str) -> crate::error::Result<u64>;
    fn hkeys(&self, bucket: &str) -> crate::error::Result<Vec<String>>;

    fn dbsize(&self) -> crate::error::Result<u64>;
    fn flushdb(&self) -> crate::error::Result<()>;
    fn info(&self) -> crate::error::Result<String>;
    fn ping(&self) -> crate::error::Result<bool>;

    fn script_load(&self, script: &str) -> crate::error::Result<String>;
    fn evalsha(&self, sha1: &str, keys: &[String], args: &[String]) -> crate::error::Result<Vec<u8>>;
}

/// A supervisor (sentinel) driver: discovers the current master set and
/// resolves the live primary endpoint behind a logical shard name.
pub trait SupervisorDriver: Send + Sync {
    /// `SENTINEL MASTERS`: the shard names this supervisor currently knows
    /// about.
    fn masters(&self) -> crate::error::Result<Vec<String>>;

    /// How many other sentinels this supervisor currently sees, used for
    /// the quorum filter (`MIN_SENTINELS`).
    fn known_sentinel_count(&self) -> crate::error::Result<usize>;

    /// Resolves the current primary address for `shard_name`.
    fn master_addr(&self, shard_name: &str) -> crate::error::Result<NodeName>;
}

/// Lets callers share one driver handle across several resolved addresses
/// (e.g. a failover client's connection cache) without the trait requiring
/// `Clone`.
impl<T: NodeDriver + ?Sized> NodeDriver for std::sync::Arc<T> {
    fn get(&self, key: &str) -> crate::error::Result<Option<Vec<u8>>> {
        (**self).get(key)
    }
    fn set(&self, key: &str, value: &[u8], nx: bool, ex: Option<u64>) -> crate::error::Result<bool> {
        (**self).set(key, value, nx, ex)
    }
    fn getset(&self, key: &str, value: &[u8]) -> crate::error::Result<Option<Vec<u8>>> {
        (**self).getset(key, value)
    }
    fn del(&self, keys: &[String]) -> crate::error::Result<u64> {
        (**self).del(keys)
    }
    fn exists(&self, key: &str) -> crate::error::Result<bool> {
        (**self).exists(key)
    }
    fn incrby(&self, key: &str, delta: i64) -> crate::error::Result<i64> {
        (**self).incrby(key, delta)
    }
    fn expire(&self, key: &str, ttl: u64) -> crate::error::Result<bool> {
        (**self).expire(key, ttl)
    }
    fn mget(&self, keys: &[String]) -> crate::error::Result<Vec<Option<Vec<u8>>>> {
        (**self).mget(keys)
    }
    fn keys(&self, pattern: &str) -> crate::error::Result<Vec<String>> {
        (**self).keys(pattern)
    }
    fn hget(&self, bucket: &str, field: &str) -> crate::error::Result<Option<Vec<u8>>> {
        (**self).hget(bucket, field)
    }
    fn hset(&self, bucket: &str, field: &str, value: &[u8], nx: bool) -> crate::error::Result<bool> {
        (**self).hset(bucket, field, value, nx)
    }
    fn hmget(&self, bucket: &str, fields: &[String]) -> crate::error::Result<Vec<Option<Vec<u8>>>> {
        (**self).hmget(bucket, fields)
    }
    fn hdel(&self, bucket: &str, fields: &[String]) -> crate::error::Result<u64> {
        (**self).hdel(bucket, fields)
    }
    fn hexists(&self, bucket: &str, field: &str) -> crate::error::Result<bool> {
        (**self).hexists(bucket, field)
    }
    fn hincrby(&self, bucket: &str, field: &str, delta: i64) -> crate::error::Result<i64> {
        (**self).hincrby(bucket, field, delta)
    }
    fn hlen(&self, bucket: &str) -> crate::error::Result<u64> {
        (**self).hlen(bucket)
    }
    fn hkeys(&self, bucket: &str) -> crate::error::Result<Vec<String>> {
        (**self).hkeys(bucket)
    }
    fn dbsize(&self) -> crate::error::Result<u64> {
        (**self).dbsize()
    }
    fn flushdb(&self) -> crate::error::Result<()> {
        (**self).flushdb()
    }
    fn info(&self) -> crate::error::Result<String> {
        (**self).info()
    }
    fn ping(&self) -> crate::error::Result<bool> {
        (**self).ping()
    }
    fn script_load(&self, script: &str) -> crate::error::Result<String> {
        (**self).script_load(script)
    }
    fn evalsha(&self, sha1: &str, keys: &[String], args: &[String]) -> crate::error::Result<Vec<u8>> {
        (**self).evalsha(sha1, keys, args)
    }
}

impl<T: SupervisorDriver + ?Sized> SupervisorDriver for std::sync::Arc<T> {
    fn masters(&self) -> crate::error::Result<Vec<String>> {
        (**self).masters()
    }
    fn known_sentinel_count(&self) -> crate::error::Result<usize> {
        (**self).known_sentinel_count()
    }
    fn master_addr(&self, shard_name: &str) -> crate::error::Result<NodeName> {
        (**self).master_addr(shard_name)
    }
}
