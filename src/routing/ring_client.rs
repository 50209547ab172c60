//! The ring-backed routing client.
//!
//! An explicit typed dispatch table in front of a consistent-hash ring of
//! nodes: broadcast, single-key-routed, tag-routed, fan-out-read,
//! fan-out-delete, tag-drop, set-with-expiry, and listing.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::node::{NodeDriver, NodeName};
use crate::ring::HashRing;
use crate::routing::Router;
use crate::script_cache::ScriptCache;
use crate::tag::{Bucket, TagExtractor};

/// Owns one driver handle per node and the ring over their names.
///
/// `nodes` is read-only after construction (per the concurrency model); the
/// only mutable shared state is the append-only [`ScriptCache`].
pub struct RingClient<D: NodeDriver> {
    nodes: HashMap<NodeName, D>,
    ring: HashRing,
    tags: TagExtractor,
    scripts: ScriptCache,
}

impl<D: NodeDriver> RingClient<D> {
    pub fn new(nodes: HashMap<NodeName, D>, vnodes: usize, tags: TagExtractor) -> Result<Self> {
        let ring = HashRing::new(nodes.keys().cloned(), vnodes)?;
        Ok(Self {
            nodes,
            ring,
            tags,
            scripts: ScriptCache::new(),
        })
    }

    pub fn script_cache(&self) -> &ScriptCache {
        &self.scripts
    }

    fn driver_for(&self, placement_key: &str) -> Result<(&NodeName, &D)> {
        let name = self
            .ring
            .get(placement_key.as_bytes())
            .expect("ring constructed with at least one node");
        let driver = self
            .nodes
            .get(name)
            .expect("every ring node has a corresponding driver handle");
        Ok((name, driver))
    }

    fn bucket_of(&self, key: &str) -> Bucket {
        self.tags.bucket_of(key)
    }

    // ---- Single-key routed: placement only, no tag rewriting ----

    /// `GETSET key value`, placed by key (bucket-aware), never rewritten
    /// into a hash-map command.
    pub fn getset(&self, key: &str, value: &[u8]) -> Result<Option<Vec<u8>>> {
        let bucket = self.bucket_of(key);
        let (_, driver) = self.driver_for(bucket.placement_key())?;
        driver.getset(key, value)
    }

    /// Acquires a simple `SET key value NX [EX ttl]` lock on the node that
    /// owns `key`. The lock protocol itself (renewal, fencing tokens) is an
    /// external collaborator's concern; this only does placement + the
    /// flat command.
    pub fn lock(&self, key: &str, token: &[u8], ttl: Option<u64>) -> Result<bool> {
        let bucket = self.bucket_of(key);
        let (_, driver) = self.driver_for(bucket.placement_key())?;
        driver.set(key, token, true, ttl)
    }

    // ---- Tag-routed: flat command if untagged, hash-map analog if tagged ----

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let bucket = self.bucket_of(key);
        let (_, driver) = self.driver_for(bucket.placement_key())?;
        match bucket {
            Bucket::Plain(k) => driver.get(&k),
            Bucket::Tagged(b) => driver.hget(&b, key),
        }
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        let bucket = self.bucket_of(key);
        let (_, driver) = self.driver_for(bucket.placement_key())?;
        match bucket {
            Bucket::Plain(k) => driver.exists(&k),
            Bucket::Tagged(b) => driver.hexists(&b, key),
        }
    }

    pub fn incrby(&self, key: &str, delta: i64) -> Result<i64> {
        let bucket = self.bucket_of(key);
        let (_, driver) = self.driver_for(bucket.placement_key())?;
        match bucket {
            Bucket::Plain(k) => driver.incrby(&k, delta),
            Bucket::Tagged(b) => driver.hincrby(&b, key, delta),
        }
    }

    /// `set(k, v, ex, nx)`. For a tagged key the TTL (when present) is
    /// applied to the whole bucket via a separate `EXPIRE`, not to the
    /// individual field — there is no per-field TTL primitive downstream.
    pub fn set(&self, key: &str, value: &[u8], nx: bool, ex: Option<u64>) -> Result<bool> {
        let bucket = self.bucket_of(key);
        let (_, driver) = self.driver_for(bucket.placement_key())?;
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

    // ---- Fan-out read ----

    /// Groups `keys` by owning node; within each node's group, issues one
    /// `MGET` for the untagged subset and one `HMGET bucket fields…` per
    /// distinct bucket, then reassembles in the caller's key order.
    pub fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut per_node: HashMap<&NodeName, NodeGroup> = HashMap::new();
        for key in keys {
            let bucket = self.bucket_of(key);
            let (name, _) = self.driver_for(bucket.placement_key())?;
            let group = per_node.entry(name).or_default();
            match bucket {
                Bucket::Plain(k) => group.untagged.push(k),
                Bucket::Tagged(b) => group.tagged.entry(b).or_default().push(key.clone()),
            }
        }

        let mut values: HashMap<String, Option<Vec<u8>>> = HashMap::new();
        for (name, group) in per_node {
            let driver = &self.nodes[name];
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

    // ---- Fan-out delete ----

    /// Same grouping as `mget`: untagged keys are `DEL`eted together per
    /// node, tagged keys are `HDEL`eted per bucket. Returns the summed
    /// count.
    pub fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut per_node: HashMap<&NodeName, NodeGroup> = HashMap::new();
        for key in keys {
            let bucket = self.bucket_of(key);
            let (name, _) = self.driver_for(bucket.placement_key())?;
            let group = per_node.entry(name).or_default();
            match bucket {
                Bucket::Plain(k) => group.untagged.push(k),
                Bucket::Tagged(b) => group.tagged.entry(b).or_default().push(key.clone()),
            }
        }

        let mut total = 0u64;
        for (name, group) in per_node {
            let driver = &self.nodes[name];
            if !group.untagged.is_empty() {
                total += driver.del(&group.untagged)?;
            }
            for (bucket, fields) in group.tagged {
                total += driver.hdel(&bucket, &fields)?;
            }
        }
        Ok(total)
    }

    // ---- Tag-drop ----

    /// `delete_tag(tags…)`: rejects any tag whose own text contains
    /// `{...}`, otherwise groups the literal bucket strings by owning node
    /// and issues one `DEL` per node.
    pub fn delete_tag(&self, tags: &[String]) -> Result<u64> {
        let mut per_node: HashMap<&NodeName, Vec<String>> = HashMap::new();
        for tag in tags {
            if tag.contains('{') || tag.contains('}') {
                tracing::warn!(tag = %tag, "rejecting delete_tag for a tag containing its own braces");
                return Err(Error::InvalidKey(tag.clone()));
            }
            let bucket = format!("{{{tag}}}");
            let (name, _) = self.driver_for(&bucket)?;
            per_node.entry(name).or_default().push(bucket);
        }

        let mut total = 0u64;
        for (name, buckets) in per_node {
            let driver = &self.nodes[name];
            total += driver.del(&buckets)?;
        }
        Ok(total)
    }

    // ---- Listing ----

    /// Broadcasts `KEYS pattern` to every node and concatenates.
    pub fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let results: Result<Vec<Vec<String>>> = self
            .nodes
            .values()
            .collect::<Vec<_>>()
            .par_iter()
            .map(|driver| driver.keys(pattern))
            .collect();
        Ok(results?.into_iter().flatten().collect())
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
        T: Send,
        F: Fn(&D) -> Result<T> + Sync,
    {
        self.nodes
            .par_iter()
            .map(|(name, driver)| {
                let result = f(driver);
                if let Err(e) = &result {
                    tracing::warn!(node = %name, error = %e, "broadcast call failed on node");
                }
                (name.clone(), result)
            })
            .collect()
    }
}

/// Keys destined for a single node, split by whether they are tagged.
#[derive(Default)]
struct NodeGroup {
    untagged: Vec<String>,
    tagged: HashMap<String, Vec<String>>,
}

impl<D: NodeDriver> Router for RingClient<D> {
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
    use crate::mock::MockNode;

    fn client(tagging: bool) -> RingClient<MockNode> {
        let mut nodes = HashMap::new();
        for i in 0..3 {
            nodes.insert(NodeName::new(format!("node{i}")), MockNode::new());
        }
        let tags = TagExtractor::new(r".*\{(.*)\}.*", tagging).unwrap();
        RingClient::new(nodes, 100, tags).unwrap()
    }

    #[test]
    fn empty_mget_touches_no_node() {
        let c = client(false);
        assert_eq!(c.mget(&[]).unwrap(), Vec::<Option<Vec<u8>>>::new());
    }

    #[test]
    fn empty_delete_touches_no_node() {
        let c = client(false);
        assert_eq!(c.delete(&[]).unwrap(), 0);
    }

    #[test]
    fn set_then_get_round_trips() {
        let c = client(false);
        assert!(c.set("hello", b"world", false, None).unwrap());
        assert_eq!(c.get("hello").unwrap(), Some(b"world".to_vec()));
    }

    #[test]
    fn tagged_keys_share_one_bucket_on_one_node() {
        let c = client(true);
        c.set("{T}-a", b"x", false, None).unwrap();
        c.set("{T}-b", b"y", false, None).unwrap();
        c.set("{T}-c", b"z", false, None).unwrap();

        assert_eq!(c.get("{T}-a").unwrap(), Some(b"x".to_vec()));
        assert_eq!(c.get("{T}-b").unwrap(), Some(b"y".to_vec()));
        assert_eq!(c.get("{T}-c").unwrap(), Some(b"z".to_vec()));

        let keys = c.keys("*").unwrap();
        assert_eq!(keys, vec!["{T}".to_string()]);
    }

    #[test]
    fn delete_tag_removes_whole_bucket() {
        let c = client(true);
        c.set("{T}-a", b"x", false, None).unwrap();
        c.set("{T}-b", b"y", false, None).unwrap();

        assert_eq!(c.delete(&["{T}-a".to_string()]).unwrap(), 1);
        assert_eq!(c.delete_tag(&["T".to_string()]).unwrap(), 1);
        assert_eq!(c.keys("*").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn delete_tag_rejects_tag_containing_braces() {
        let c = client(true);
        let err = c.delete_tag(&["{bad}".to_string()]).unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));
    }

    #[test]
    fn mget_reassembles_in_caller_order() {
        let c = client(false);
        c.set("a", b"a", false, None).unwrap();
        c.set("b", b"b", false, None).unwrap();
        c.set("c", b"c", false, None).unwrap();

        let keys = vec!["a".to_string(), "missing".to_string(), "c".to_string()];
        let values = c.mget(&keys).unwrap();
        assert_eq!(
            values,
            vec![Some(b"a".to_vec()), None, Some(b"c".to_vec())]
        );
    }
}
