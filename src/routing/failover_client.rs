//! The sentinel/supervisor-backed routing client.
//!
//! The ring is built over logical shard names (`mymaster0`, `mymaster1`,
//! ...) rather than `host:port` pairs, so a failover never reshuffles
//! placement — only the driver behind a shard name changes. Bootstrap
//! resolves the current master list from a quorum of supervisors
//! (`bootstrap_masters` below); the per-shard primary lookup
//! (`current_addr`) is re-resolved on every call rather than cached.

use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::error::{Error, Result};
use crate::node::{NodeDriver, NodeName, SupervisorDriver};
use crate::ring::HashRing;
use crate::routing::Router;
use crate::tag::{Bucket, TagExtractor};

/// Tries every supervisor, in random order, until one answers. Supervisors
/// reporting fewer than `min_sentinels` known peers are skipped entirely —
/// they are not part of the discovery quorum.
fn bootstrap_masters<S: SupervisorDriver>(supervisors: &[S], min_sentinels: usize) -> Result<Vec<String>> {
    let mut order: Vec<usize> = (0..supervisors.len()).collect();
    order.shuffle(&mut rand::thread_rng());

    for idx in order {
        let supervisor = &supervisors[idx];
        let sentinel_count = match supervisor.known_sentinel_count() {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(supervisor = idx, error = %e, "supervisor unreachable during bootstrap");
                continue;
            }
        };
        if sentinel_count < min_sentinels {
            tracing::debug!(supervisor = idx, sentinel_count, min_sentinels, "below quorum, skipping");
            continue;
        }
        match supervisor.masters() {
            Ok(list) if list.is_empty() => return Err(Error::NoMastersConfigured),
            Ok(list) => {
                tracing::debug!(supervisor = idx, shards = list.len(), "bootstrap resolved master list");
                return Ok(list);
            }
            Err(e) => {
                tracing::warn!(supervisor = idx, error = %e, "masters() failed during bootstrap");
                continue;
            }
        }
    }
    Err(Error::MastersUnavailable)
}

/// A ring client whose node set is a fixed collection of logical shard
/// names, each resolved to its current primary address through a
/// supervisor quorum on every call.
///
/// `connect` plays the role of a connection factory: given a resolved
/// address, it returns a driver handle for it. Resolved handles are cached
/// by address in `connections` so a steady-state primary is not
/// reconnected on every call; a failover simply produces a new address and
/// a fresh cache entry, the stale one is left for the driver to reap on
/// drop.
pub struct FailoverClient<S: SupervisorDriver, D: NodeDriver> {
    supervisors: Vec<S>,
    min_sentinels: usize,
    ring: HashRing,
    tags: TagExtractor,
    connect: Arc<dyn Fn(&NodeName) -> D + Send + Sync>,
    connections: dashmap::DashMap<NodeName, D>,
}

impl<S: SupervisorDriver, D: NodeDriver> FailoverClient<S, D> {
    pub fn new(
        supervisors: Vec<S>,
        min_sentinels: Option<usize>,
        vnodes: usize,
        tags: TagExtractor,
        connect: impl Fn(&NodeName) -> D + Send + Sync + 'static,
    ) -> Result<Self> {
        let min_sentinels = min_sentinels.unwrap_or_else(|| supervisors.len() / 2);
        let master_names = bootstrap_masters(&supervisors, min_sentinels)?;
        let ring = HashRing::new(master_names.into_iter().map(NodeName::new), vnodes)?;
        Ok(Self {
            supervisors,
            min_sentinels,
            ring,
            tags,
            connect: Arc::new(connect),
            connections: dashmap::DashMap::new(),
        })
    }

    pub fn shard_names(&self) -> impl Iterator<Item = &NodeName> {
        self.ring.nodes()
    }

    /// Quorum-filtered supervisor indices, falling back to the full list if
    /// none currently clears `min_sentinels` (a fully-partitioned quorum
    /// should still be able to serve reads against whatever it last saw).
    fn discovery_pool(&self) -> Vec<&S> {
        let quorum: Vec<&S> = self
            .supervisors
            .iter()
            .filter(|s| s.known_sentinel_count().map(|n| n >= self.min_sentinels).unwrap_or(false))
            .collect();
        if quorum.is_empty() {
            self.supervisors.iter().collect()
        } else {
            quorum
        }
    }

    fn current_addr(&self, shard: &NodeName) -> Result<NodeName> {
        for supervisor in self.discovery_pool() {
            match supervisor.master_addr(shard.as_str()) {
                Ok(addr) => return Ok(addr),
                Err(e) => tracing::debug!(shard = %shard, error = %e, "supervisor could not resolve primary, trying next"),
            }
        }
        tracing::warn!(shard = %shard, "no supervisor could resolve a primary address");
        Err(Error::MastersUnavailable)
    }

    fn driver_for_shard(&self, shard: &NodeName) -> Result<dashmap::mapref::one::Ref<'_, NodeName, D>> {
        let addr = self.current_addr(shard)?;
        self.connections.entry(addr.clone()).or_insert_with(|| (self.connect)(&addr));
        self.connections
            .get(&addr)
            .ok_or_else(|| Error::Driver("connection vanished immediately after insert".into()))
    }

    fn bucket_of(&self, key: &str) -> Bucket {
        self.tags.bucket_of(key)
    }

    fn driver_for_placement(
        &self,
        placement_key: &str,
    ) -> Result<(NodeName, dashmap::mapref::one::Ref<'_, NodeName, D>)> {
        let shard = self
            .ring
            .get(placement_key.as_bytes())
            .expect("ring constructed with at least one shard")
            .clone();
        let driver = self.driver_for_shard(&shard)?;
        Ok((shard, driver))
    }

    // ---- Single-key routed ----

    pub fn getset(&self, key: &str, value: &[u8]) -> Result<Option<Vec<u8>>> {
        let bucket = self.bucket_of(key);
        let (_, driver) = self.driver_for_placement(bucket.placement_key())?;
        driver.getset(key, value)
    }

    pub fn lock(&self, key: &str, token: &[u8], ttl: Option<u64>) -> Result<bool> {
        let bucket = self.bucket_of(key);
        let (_, driver) = self.driver_for_placement(bucket.placement_key())?;
        driver.set(key, token, true, ttl)
    }

    // ---- Tag-routed ----

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let bucket = self.bucket_of(key);
        let (_, driver) = self.driver_for_placement(bucket.placement_key())?;
        match bucket {
            Bucket::Plain(k) => driver.get(&k),
            Bucket::Tagged(b) => driver.hget(&b, key),
        }
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        let bucket = self.bucket_of(key);
        let (_, driver) = self.driver_for_placement(bucket.placement_key())?;
        match bucket {
            Bucket::Plain(k) => driver.exists(&k),
            Bucket::Tagged(b) => driver.hexists(&b, key),
        }
    }

    pub fn incrby(&self, key: &str, delta: i64) -> Result<i64> {
        let bucket = self.bucket_of(key);
        let (_, driver) = self.driver_for_placement(bucket.placement_key())?;
        match bucket {
            Bucket::Plain(k) => driver.incrby(&k, delta),
            Bucket::Tagged(b) => driver.hincrby(&b, key, delta),
        }
    }

    pub fn set(&self, key: &str, value: &[u8], nx: bool, ex: Option<u64>) -> Result<bool> {
        let bucket = self.bucket_of(key);
        let (_, driver) = self.driver_for_placement(bucket.placement_key())?;
        match bucket {
            Bucket::Plain(k) => driver.set(&k, value, nx, ex),
            Bucket::Tagged(b) => {
                let stored = driver.hset(&b, key, value, nx)?;
                if let Some(ttl) = ex {
                    driver.expire(&b, ttl)?;
                }
                Ok(stored)
            }
        }
    }

    pub fn setnx(&self, key: &str, value: &[u8]) -> Result<bool> {
        self.set(key, value, true, None)
    }

    // ---- Fan-out read / delete ----

    pub fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut per_shard: HashMap<NodeName, NodeGroup> = HashMap::new();
        for key in keys {
            let bucket = self.bucket_of(key);
            let shard = self
                .ring
                .get(bucket.placement_key().as_bytes())
                .expect("ring constructed with at least one shard")
                .clone();
            let group = per_shard.entry(shard).or_default();
            match bucket {
                Bucket::Plain(k) => group.untagged.push(k),
                Bucket::Tagged(b) => group.tagged.entry(b).or_default().push(key.clone()),
            }
        }

        let mut values: HashMap<String, Option<Vec<u8>>> = HashMap::new();
        for (shard, group) in per_shard {
            let driver = self.driver_for_shard(&shard)?;
            if !group.untagged.is_empty() {
                let results = driver.mget(&group.untagged)?;
                for (key, value) in group.untagged.into_iter().zip(results) {
                    values.insert(key, value);
                }
            }
            for (bucket, fields) in group.tagged {
                let results = driver.hmget(&bucket, &fields)?;
                for (field, value) in fields.into_iter().zip(results) {
                    values.insert(field, value);
                }
            }
        }

        Ok(keys.iter().map(|k| values.remove(k).flatten()).collect())
    }

    pub fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut per_shard: HashMap<NodeName, NodeGroup> = HashMap::new();
        for key in keys {
            let bucket = self.bucket_of(key);
            let shard = self
                .ring
                .get(bucket.placement_key().as_bytes())
                .expect("ring constructed with at least one shard")
                .clone();
            let group = per_shard.entry(shard).or_default();
            match bucket {
                Bucket::Plain(k) => group.untagged.push(k),
                Bucket::Tagged(b) => group.tagged.entry(b).or_default().push(key.clone()),
            }
        }

        let mut total = 0u64;
        for (shard, group) in per_shard {
            let driver = self.driver_for_shard(&shard)?;
            if !group.untagged.is_empty() {
                total += driver.del(&group.untagged)?;
            }
            for (bucket, fields) in group.tagged {
                total += driver.hdel(&bucket, &fields)?;
            }
        }
        Ok(total)
    }

    pub fn delete_tag(&self, tags: &[String]) -> Result<u64> {
        let mut per_shard: HashMap<NodeName, Vec<String>> = HashMap::new();
        for tag in tags {
            if tag.contains('{') || tag.contains('}') {
                return Err(Error::InvalidKey(tag.clone()));
            }
            let bucket = format!("{{{tag}}}");
            let shard = self
                .ring
                .get(bucket.as_bytes())
                .expect("ring constructed with at least one shard")
                .clone();
            per_shard.entry(shard).or_default().push(bucket);
        }

        let mut total = 0u64;
        for (shard, buckets) in per_shard {
            let driver = self.driver_for_shard(&shard)?;
            total += driver.del(&buckets)?;
        }
        Ok(total)
    }

    // ---- Listing ----

    pub fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for shard in self.ring.nodes().cloned().collect::<Vec<_>>() {
            let driver = self.driver_for_shard(&shard)?;
            out.extend(driver.keys(pattern)?);
        }
        Ok(out)
    }

    // ---- Broadcast ----

    pub fn dbsize(&self) -> HashMap<NodeName, Result<u64>> {
        self.broadcast(|driver| driver.dbsize())
    }

    pub fn flushdb(&self) -> HashMap<NodeName, Result<()>> {
        self.broadcast(|driver| driver.flushdb())
    }

    pub fn info(&self) -> HashMap<NodeName, Result<String>> {
        self.broadcast(|driver| driver.info())
    }

    pub fn ping(&self) -> HashMap<NodeName, Result<bool>> {
        self.broadcast(|driver| driver.ping())
    }

    fn broadcast<T, F>(&self, f: F) -> HashMap<NodeName, Result<T>>
    where
        F: Fn(&D) -> Result<T>,
    {
        self.ring
            .nodes()
            .map(|shard| {
                let result = self.driver_for_shard(shard).and_then(|driver| f(&driver));
                (shard.clone(), result)
            })
            .collect()
    }
}

/// Keys destined for a single shard, split by whether they are tagged.
#[derive(Default)]
struct NodeGroup {
    untagged: Vec<String>,
    tagged: HashMap<String, Vec<String>>,
}

impl<S: SupervisorDriver, D: NodeDriver> Router for FailoverClient<S, D> {
    fn route_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.get(key)
    }

    fn route_set(&self, key: &str, value: &[u8], nx: bool, ex: Option<u64>) -> Result<bool> {
        self.set(key, value, nx, ex)
    }

    fn route_exists(&self, key: &str) -> Result<bool> {
        self.exists(key)
    }

    fn route_incrby(&self, key: &str, delta: i64) -> Result<i64> {
        self.incrby(key, delta)
    }

    fn route_delete(&self, keys: &[String]) -> Result<u64> {
        self.delete(keys)
    }

    fn route_delete_tag(&self, tags: &[String]) -> Result<u64> {
        self.delete_tag(tags)
    }

    fn route_mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.mget(keys)
    }

    fn route_keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.keys(pattern)
    }

    fn route_flushdb(&self) -> Result<()> {
        for result in self.flushdb().into_values() {
            result?;
        }
        Ok(())
    }

    fn route_ping(&self) -> Result<HashMap<String, bool>> {
        let mut out = HashMap::new();
        for (name, result) in self.ping() {
            out.insert(name.0, result?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockNode, MockSupervisor};
    use dashmap::DashMap as ConnRegistry;

    fn client(
        sentinels: Vec<Arc<MockSupervisor>>,
        min_sentinels: usize,
        registry: Arc<ConnRegistry<String, Arc<MockNode>>>,
    ) -> FailoverClient<Arc<MockSupervisor>, Arc<MockNode>> {
        let tags = TagExtractor::new(r".*\{(.*)\}.*", true).unwrap();
        let connect = move |addr: &NodeName| {
            registry
                .entry(addr.0.clone())
                .or_insert_with(|| Arc::new(MockNode::new()))
                .clone()
        };
        FailoverClient::new(sentinels, Some(min_sentinels), 100, tags, connect).unwrap()
    }

    fn one_shard_setup() -> (FailoverClient<Arc<MockSupervisor>, Arc<MockNode>>, Arc<MockSupervisor>) {
        let sentinel = Arc::new(MockSupervisor::new(vec!["mymaster0".to_string()], 3));
        sentinel.set_master_addr("mymaster0", NodeName::new("host-a:6379"));
        let registry = Arc::new(ConnRegistry::new());
        let c = client(vec![sentinel.clone()], 1, registry);
        (c, sentinel)
    }

    #[test]
    fn bootstrap_fails_when_no_masters_configured() {
        let sentinel = Arc::new(MockSupervisor::new(vec![], 3));
        let tags = TagExtractor::new(r".*\{(.*)\}.*", true).unwrap();
        let registry: Arc<ConnRegistry<String, Arc<MockNode>>> = Arc::new(ConnRegistry::new());
        let connect = move |addr: &NodeName| {
            registry
                .entry(addr.0.clone())
                .or_insert_with(|| Arc::new(MockNode::new()))
                .clone()
        };
        let err = FailoverClient::new(vec![sentinel], Some(1), 100, tags, connect).unwrap_err();
        assert!(matches!(err, Error::NoMastersConfigured));
    }

    #[test]
    fn bootstrap_tolerates_a_dead_sentinel() {
        let dead = Arc::new(MockSupervisor::new(vec!["mymaster0".to_string()], 3));
        dead.alive.store(false, std::sync::atomic::Ordering::SeqCst);
        let alive = Arc::new(MockSupervisor::new(vec!["mymaster0".to_string()], 3));
        alive.set_master_addr("mymaster0", NodeName::new("host-a:6379"));

        let registry = Arc::new(ConnRegistry::new());
        let c = client(vec![dead, alive], 1, registry);
        assert_eq!(c.shard_names().count(), 1);
    }

    #[test]
    fn set_then_get_round_trips_through_resolved_primary() {
        let (c, _sentinel) = one_shard_setup();
        assert!(c.set("hello", b"world", false, None).unwrap());
        assert_eq!(c.get("hello").unwrap(), Some(b"world".to_vec()));
    }

    #[test]
    fn shard_name_survives_failover_to_a_new_address() {
        let (c, sentinel) = one_shard_setup();
        assert!(c.set("hello", b"world", false, None).unwrap());

        // Failover: the logical shard now resolves to a different address.
        sentinel.set_master_addr("mymaster0", NodeName::new("host-b:6379"));

        // Ring placement is unaffected (still `mymaster0`); but the value
        // lives on the old primary, which the new address does not share.
        assert_eq!(c.get("hello").unwrap(), None);
        assert!(c.set("hello", b"world2", false, None).unwrap());
        assert_eq!(c.get("hello").unwrap(), Some(b"world2".to_vec()));
    }

    #[test]
    fn tagged_keys_still_share_one_bucket_under_failover_routing() {
        let (c, _sentinel) = one_shard_setup();
        c.set("{T}-a", b"x", false, None).unwrap();
        c.set("{T}-b", b"y", false, None).unwrap();
        assert_eq!(c.keys("*").unwrap(), vec!["{T}".to_string()]);
    }
}
