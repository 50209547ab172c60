//! In-memory `NodeDriver`/`SupervisorDriver` implementations.
//!
//! The downstream KV and supervisor protocols are external collaborators —
//! this module exists purely so the crate's own tests can exercise the
//! facade/tag/failover scenarios without a live server, standing in for a
//! test runner that would otherwise spawn real server binaries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha1::{Digest, Sha1};

use crate::error::Result;
use crate::node::{NodeDriver, NodeName, SupervisorDriver};

#[derive(Default)]
struct Store {
    plain: HashMap<String, Vec<u8>>,
    plain_expiry: HashMap<String, Instant>,
    buckets: HashMap<String, HashMap<String, Vec<u8>>>,
    bucket_expiry: HashMap<String, Instant>,
}

impl Store {
    fn is_plain_live(&self, key: &str) -> bool {
        match self.plain_expiry.get(key) {
            Some(deadline) => Instant::now() < *deadline,
            None => self.plain.contains_key(key),
        }
    }

    fn is_bucket_live(&self, bucket: &str) -> bool {
        match self.bucket_expiry.get(bucket) {
            Some(deadline) => Instant::now() < *deadline,
            None => self.buckets.contains_key(bucket),
        }
    }

    fn sweep_plain(&mut self, key: &str) {
        if !self.is_plain_live(key) {
            self.plain.remove(key);
            self.plain_expiry.remove(key);
        }
    }

    fn sweep_bucket(&mut self, bucket: &str) {
        if !self.is_bucket_live(bucket) {
            self.buckets.remove(bucket);
            self.bucket_expiry.remove(bucket);
        }
    }
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    regex::Regex::new(&format!("^{escaped}$"))
        .map(|re| re.is_match(candidate))
        .unwrap_or(false)
}

/// An in-memory stand-in for a single backend node.
pub struct MockNode {
    store: Mutex<Store>,
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNode {
    pub fn new() -> Self {
        Self { store: Mutex::new(Store::default()) }
    }
}

impl NodeDriver for MockNode {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut store = self.store.lock();
        store.sweep_plain(key);
        Ok(store.plain.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8], nx: bool, ex: Option<u64>) -> Result<bool> {
        let mut store = self.store.lock();
        store.sweep_plain(key);
        if nx && store.plain.contains_key(key) {
            return Ok(false);
        }
        store.plain.insert(key.to_string(), value.to_vec());
        match ex {
            Some(ttl) => {
                store
                    .plain_expiry
                    .insert(key.to_string(), Instant::now() + Duration::from_secs(ttl));
            }
            None => {
                store.plain_expiry.remove(key);
            }
        }
        Ok(true)
    }

    fn getset(&self, key: &str, value: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut store = self.store.lock();
        store.sweep_plain(key);
        let previous = store.plain.insert(key.to_string(), value.to_vec());
        store.plain_expiry.remove(key);
        Ok(previous)
    }

    fn del(&self, keys: &[String]) -> Result<u64> {
        let mut store = self.store.lock();
        let mut count = 0;
        for key in keys {
            store.sweep_plain(key);
            if store.plain.remove(key).is_some() {
                count += 1;
            }
            store.plain_expiry.remove(key);
        }
        Ok(count)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let mut store = self.store.lock();
        store.sweep_plain(key);
        Ok(store.plain.contains_key(key))
    }

    fn incrby(&self, key: &str, delta: i64) -> Result<i64> {
        let mut store = self.store.lock();
        store.sweep_plain(key);
        let current: i64 = store
            .plain
            .get(key)
            .map(|b| String::from_utf8_lossy(b).parse().unwrap_or(0))
            .unwrap_or(0);
        let updated = current + delta;
        store.plain.insert(key.to_string(), updated.to_string().into_bytes());
        Ok(updated)
    }

    fn expire(&self, key: &str, ttl: u64) -> Result<bool> {
        let mut store = self.store.lock();
        store.sweep_plain(key);
        if !store.plain.contains_key(key) && !store.buckets.contains_key(key) {
            return Ok(false);
        }
        let deadline = Instant::now() + Duration::from_secs(ttl);
        if store.plain.contains_key(key) {
            store.plain_expiry.insert(key.to_string(), deadline);
        }
        if store.buckets.contains_key(key) {
            store.bucket_expiry.insert(key.to_string(), deadline);
        }
        Ok(true)
    }

    fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut store = self.store.lock();
        Ok(keys
            .iter()
            .map(|k| {
                store.sweep_plain(k);
                store.plain.get(k).cloned()
            })
            .collect())
    }

    fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut store = self.store.lock();
        let plain_keys: Vec<String> = store.plain.keys().cloned().collect();
        for k in &plain_keys {
            store.sweep_plain(k);
        }
        let bucket_keys: Vec<String> = store.buckets.keys().cloned().collect();
        for b in &bucket_keys {
            store.sweep_bucket(b);
        }
        let mut out: Vec<String> = store
            .plain
            .keys()
            .chain(store.buckets.keys())
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        out.sort();
        Ok(out)
    }

    fn hget(&self, bucket: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let mut store = self.store.lock();
        store.sweep_bucket(bucket);
        Ok(store.buckets.get(bucket).and_then(|b| b.get(field)).cloned())
    }

    fn hset(&self, bucket: &str, field: &str, value: &[u8], nx: bool) -> Result<bool> {
        let mut store = self.store.lock();
        store.sweep_bucket(bucket);
        let map = store.buckets.entry(bucket.to_string()).or_default();
        if nx && map.contains_key(field) {
            return Ok(false);
        }
        map.insert(field.to_string(), value.to_vec());
        Ok(true)
    }

    fn hmget(&self, bucket: &str, fields: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut store = self.store.lock();
        store.sweep_bucket(bucket);
        let map = store.buckets.get(bucket);
        Ok(fields
            .iter()
            .map(|f| map.and_then(|m| m.get(f)).cloned())
            .collect())
    }

    fn hdel(&self, bucket: &str, fields: &[String]) -> Result<u64> {
        let mut store = self.store.lock();
        store.sweep_bucket(bucket);
        let mut count = 0;
        if let Some(map) = store.buckets.get_mut(bucket) {
            for field in fields {
                if map.remove(field).is_some() {
                    count += 1;
                }
            }
            if map.is_empty() {
                store.buckets.remove(bucket);
                store.bucket_expiry.remove(bucket);
            }
        }
        Ok(count)
    }

    fn hexists(&self, bucket: &str, field: &str) -> Result<bool> {
        let mut store = self.store.lock();
        store.sweep_bucket(bucket);
        Ok(store.buckets.get(bucket).is_some_and(|m| m.contains_key(field)))
    }

    fn hincrby(&self, bucket: &str, field: &str, delta: i64) -> Result<i64> {
        let mut store = self.store.lock();
        store.sweep_bucket(bucket);
        let map = store.buckets.entry(bucket.to_string()).or_default();
        let current: i64 = map
            .get(field)
            .map(|b| String::from_utf8_lossy(b).parse().unwrap_or(0))
            .unwrap_or(0);
        let updated = current + delta;
        map.insert(field.to_string(), updated.to_string().into_bytes());
        Ok(updated)
    }

    fn hlen(&self, bucket: &str) -> Result<u64> {
        let mut store = self.store.lock();
        store.sweep_bucket(bucket);
        Ok(store.buckets.get(bucket).map(|m| m.len() as u64).unwrap_or(0))
    }

    fn hkeys(&self, bucket: &str) -> Result<Vec<String>> {
        let mut store = self.store.lock();
        store.sweep_bucket(bucket);
        Ok(store
            .buckets
            .get(bucket)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn dbsize(&self) -> Result<u64> {
        let store = self.store.lock();
        Ok((store.plain.len() + store.buckets.len()) as u64)
    }

    fn flushdb(&self) -> Result<()> {
        let mut store = self.store.lock();
        *store = Store::default();
        Ok(())
    }

    fn info(&self) -> Result<String> {
        Ok("mock_node:1\r\n".to_string())
    }

    fn ping(&self) -> Result<bool> {
        Ok(true)
    }

    fn script_load(&self, script: &str) -> Result<String> {
        let mut hasher = Sha1::new();
        hasher.update(script.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    fn evalsha(&self, _sha1: &str, _keys: &[String], _args: &[String]) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// An in-memory supervisor: always reports a fixed master list, and lets
/// tests swap in a failed-over address for a shard.
pub struct MockSupervisor {
    pub masters: Vec<String>,
    pub known_sentinels: usize,
    pub alive: std::sync::atomic::AtomicBool,
    addrs: Mutex<HashMap<String, NodeName>>,
    calls: AtomicUsize,
}

impl MockSupervisor {
    pub fn new(masters: Vec<String>, known_sentinels: usize) -> Self {
        let addrs = masters
            .iter()
            .map(|m| (m.clone(), NodeName::new(m.clone())))
            .collect();
        Self {
            masters,
            known_sentinels,
            alive: std::sync::atomic::AtomicBool::new(true),
            addrs: Mutex::new(addrs),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_master_addr(&self, shard: &str, addr: NodeName) {
        self.addrs.lock().insert(shard.to_string(), addr);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SupervisorDriver for MockSupervisor {
    fn masters(&self) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.alive.load(Ordering::SeqCst) {
            return Err(crate::error::Error::ConnectionError("supervisor down".into()));
        }
        Ok(self.masters.clone())
    }

    fn known_sentinel_count(&self) -> Result<usize> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(crate::error::Error::ConnectionError("supervisor down".into()));
        }
        Ok(self.known_sentinels)
    }

    fn master_addr(&self, shard_name: &str) -> Result<NodeName> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(crate::error::Error::ConnectionError("supervisor down".into()));
        }
        self.addrs
            .lock()
            .get(shard_name)
            .cloned()
            .ok_or_else(|| crate::error::Error::Driver(format!("unknown shard {shard_name}")))
    }
}
