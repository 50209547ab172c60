//! The cache facade.
//!
//! A thin, versioned wrapper around a [`Router`] that applies the
//! key-naming and value-codec policy uniformly across whichever routing
//! client backs it.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{self, AsCacheInt, DecodedValue, EncodedValue};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::keyspace::KeyNamer;
use crate::node::{NodeDriver, NodeName, SupervisorDriver};
use crate::routing::{FailoverClient, Router, RingClient};
use crate::tag::TagExtractor;

/// Versioned, codec-aware cache facade. Generic over [`Router`] so it works
/// unchanged whether `R` is a [`crate::routing::RingClient`] or a
/// [`crate::routing::FailoverClient`].
pub struct Cache<R: Router> {
    router: R,
    namer: KeyNamer,
    compress: bool,
    default_version: u64,
}

impl<R: Router> Cache<R> {
    pub fn new(router: R, key_prefix: impl Into<String>, compress: bool) -> Self {
        Self {
            router,
            namer: KeyNamer::new(key_prefix),
            compress,
            default_version: 1,
        }
    }

    fn storage_key(&self, key: &str, version: Option<u64>) -> String {
        self.namer.storage_key(key, version.unwrap_or(self.default_version))
    }

    fn set_encoded(&self, storage_key: &str, encoded: EncodedValue, nx: bool, ex: Option<f64>) -> Result<bool> {
        if ex.is_some_and(|e| e <= 0.0) {
            return Ok(false);
        }
        self.router.route_set(storage_key, &encoded.into_bytes(), nx, ex.map(|secs| secs as u64))
    }

    // ---- Basic get/set/add/delete ----

    pub fn get<T: DeserializeOwned>(&self, key: &str, version: Option<u64>) -> Result<Option<DecodedValue<T>>> {
        let storage_key = self.storage_key(key, version);
        let bytes = self.router.route_get(&storage_key)?;
        codec::loads(bytes.as_deref(), self.compress)
    }

    pub fn set<T: Serialize + AsCacheInt>(
        &self,
        key: &str,
        value: &T,
        ex: Option<f64>,
        version: Option<u64>,
    ) -> Result<bool> {
        let storage_key = self.storage_key(key, version);
        let encoded = codec::dumps(value, self.compress)?;
        self.set_encoded(&storage_key, encoded, false, ex)
    }

    /// `add`: like `set`, but only stores if the key was absent.
    pub fn add<T: Serialize + AsCacheInt>(
        &self,
        key: &str,
        value: &T,
        ex: Option<f64>,
        version: Option<u64>,
    ) -> Result<bool> {
        let storage_key = self.storage_key(key, version);
        let encoded = codec::dumps(value, self.compress)?;
        self.set_encoded(&storage_key, encoded, true, ex)
    }

    pub fn delete(&self, key: &str, version: Option<u64>) -> Result<bool> {
        let storage_key = self.storage_key(key, version);
        Ok(self.router.route_delete(&[storage_key])? > 0)
    }

    pub fn has_key(&self, key: &str, version: Option<u64>) -> Result<bool> {
        let storage_key = self.storage_key(key, version);
        self.router.route_exists(&storage_key)
    }

    // ---- Bulk ----

    /// Omits keys that were absent, returning only the hits.
    pub fn get_many<T: DeserializeOwned>(
        &self,
        keys: &[String],
        version: Option<u64>,
    ) -> Result<HashMap<String, DecodedValue<T>>> {
        let storage_keys: Vec<String> = keys.iter().map(|k| self.storage_key(k, version)).collect();
        let values = self.router.route_mget(&storage_keys)?;
        let mut out = HashMap::new();
        for (key, bytes) in keys.iter().zip(values) {
            if let Some(decoded) = codec::loads::<T>(bytes.as_deref(), self.compress)? {
                out.insert(key.clone(), decoded);
            }
        }
        Ok(out)
    }

    /// Fans the per-key `set` calls out in parallel; each key is still
    /// routed and stored independently (the downstream command set has no
    /// native multi-key `SET` with per-key TTL), but node-to-node latency
    /// is not paid serially.
    pub fn set_many<T: Serialize + AsCacheInt + Sync>(
        &self,
        items: &[(String, T)],
        ex: Option<f64>,
        version: Option<u64>,
    ) -> Result<()> {
        items
            .par_iter()
            .map(|(key, value)| self.set(key, value, ex, version).map(|_| ()))
            .collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    pub fn delete_many(&self, keys: &[String], version: Option<u64>) -> Result<u64> {
        let storage_keys: Vec<String> = keys.iter().map(|k| self.storage_key(k, version)).collect();
        self.router.route_delete(&storage_keys)
    }

    // ---- Atomic increment (requires the key to already exist) ----

    pub fn incr(&self, key: &str, delta: i64, version: Option<u64>) -> Result<i64> {
        let storage_key = self.storage_key(key, version);
        if !self.router.route_exists(&storage_key)? {
            return Err(Error::ValueError);
        }
        self.router.route_incrby(&storage_key, delta)
    }

    pub fn decr(&self, key: &str, delta: i64, version: Option<u64>) -> Result<i64> {
        self.incr(key, -delta, version)
    }

    // ---- Version rename (non-atomic: get, set-at-new-version, delete-at-old-version) ----

    /// Moves `key` from `version` (or the default) to `version + delta`,
    /// returning the new version.
    ///
    /// This is three separate router calls, not a transaction: a concurrent
    /// writer to the old version between the `get` and the `delete` below
    /// is lost.
    pub fn incr_version<T: Serialize + DeserializeOwned + AsCacheInt>(
        &self,
        key: &str,
        delta: i64,
        version: Option<u64>,
    ) -> Result<u64> {
        let old_version = version.unwrap_or(self.default_version);
        let new_version = (old_version as i64 + delta).max(0) as u64;

        let decoded: DecodedValue<T> = self
            .get(key, Some(old_version))?
            .ok_or(Error::ValueError)?;

        let encoded = match decoded {
            DecodedValue::Int(n) => EncodedValue::Int(n),
            DecodedValue::Value(v) => codec::dumps(&v, self.compress)?,
        };
        let new_storage_key = self.storage_key(key, Some(new_version));
        self.set_encoded(&new_storage_key, encoded, false, None)?;
        self.delete(key, Some(old_version))?;
        Ok(new_version)
    }

    pub fn decr_version<T: Serialize + DeserializeOwned + AsCacheInt>(
        &self,
        key: &str,
        delta: i64,
        version: Option<u64>,
    ) -> Result<u64> {
        self.incr_version::<T>(key, -delta, version)
    }

    // ---- Whole-cache operations ----

    pub fn clear(&self) -> Result<()> {
        self.router.route_flushdb()
    }

    /// Connection lifecycle is a driver concern; the facade has nothing of
    /// its own to release.
    pub fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl<D: NodeDriver> Cache<RingClient<D>> {
    /// Builds a ring-backed cache straight from a validated [`ClientConfig`],
    /// dialing one driver per `LOCATION` entry via `connect`.
    pub fn from_config(config: &ClientConfig, connect: impl Fn(&str) -> D) -> Result<Self> {
        let mut nodes = HashMap::new();
        for location in &config.locations {
            nodes.insert(NodeName::new(location.clone()), connect(location));
        }
        let tags = TagExtractor::new(&config.tag_regex, config.enable_tagging)?;
        let router = RingClient::new(nodes, config.vnodes, tags)?;
        Ok(Self::new(router, config.key_prefix.clone(), config.compress))
    }
}

impl<S: SupervisorDriver, D: NodeDriver> Cache<FailoverClient<S, D>> {
    /// Builds a sentinel-backed cache straight from a validated
    /// [`ClientConfig`], dialing one supervisor per `LOCATION` entry via
    /// `connect_supervisor` and deferring node connections to `connect_node`
    /// (called lazily, once per resolved primary address).
    pub fn from_failover_config(
        config: &ClientConfig,
        connect_supervisor: impl Fn(&str) -> S,
        connect_node: impl Fn(&NodeName) -> D + Send + Sync + 'static,
    ) -> Result<Self> {
        let supervisors: Vec<S> = config.locations.iter().map(|loc| connect_supervisor(loc)).collect();
        let tags = TagExtractor::new(&config.tag_regex, config.enable_tagging)?;
        let router = FailoverClient::new(supervisors, config.min_sentinels, config.vnodes, tags, connect_node)?;
        Ok(Self::new(router, config.key_prefix.clone(), config.compress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfigBuilder;
    use crate::mock::{MockNode, MockSupervisor};
    use crate::routing::RingClient;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Arc;

    fn cache() -> Cache<RingClient<MockNode>> {
        let mut nodes = StdHashMap::new();
        for i in 0..3 {
            nodes.insert(crate::node::NodeName::new(format!("node{i}")), MockNode::new());
        }
        let tags = TagExtractor::new(r".*\{(.*)\}.*", false).unwrap();
        let router = RingClient::new(nodes, 100, tags).unwrap();
        Cache::new(router, "myapp", false)
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("cannot serialize this value"))
        }
    }

    impl AsCacheInt for Unserializable {
        fn as_cache_int(&self) -> Option<i64> {
            None
        }
    }

    #[test]
    fn set_then_get_round_trips() {
        let c = cache();
        assert!(c.set("answer", &"42".to_string(), None, None).unwrap());
        let got: DecodedValue<String> = c.get("answer", None).unwrap().unwrap();
        assert_eq!(got, DecodedValue::Value("42".to_string()));
    }

    #[test]
    fn missing_key_is_none() {
        let c = cache();
        let got: Option<DecodedValue<String>> = c.get("nope", None).unwrap();
        assert_eq!(got, None);
    }

    #[test]
    fn add_does_not_overwrite() {
        let c = cache();
        assert!(c.add("k", &"first".to_string(), None, None).unwrap());
        assert!(!c.add("k", &"second".to_string(), None, None).unwrap());
        let got: DecodedValue<String> = c.get("k", None).unwrap().unwrap();
        assert_eq!(got, DecodedValue::Value("first".to_string()));
    }

    #[test]
    fn has_key_reflects_presence() {
        let c = cache();
        assert!(!c.has_key("k", None).unwrap());
        c.set("k", &"v".to_string(), None, None).unwrap();
        assert!(c.has_key("k", None).unwrap());
    }

    #[test]
    fn delete_removes_key() {
        let c = cache();
        c.set("k", &"v".to_string(), None, None).unwrap();
        assert!(c.delete("k", None).unwrap());
        assert!(!c.has_key("k", None).unwrap());
    }

    #[test]
    fn incr_requires_existing_key() {
        let c = cache();
        let err = c.incr("missing", 1, None).unwrap_err();
        assert!(matches!(err, Error::ValueError));
    }

    #[test]
    fn incr_and_decr_update_in_place() {
        let c = cache();
        c.set("counter", &10i64, None, None).unwrap();
        assert_eq!(c.incr("counter", 5, None).unwrap(), 15);
        assert_eq!(c.decr("counter", 3, None).unwrap(), 12);
    }

    #[test]
    fn get_many_omits_misses() {
        let c = cache();
        c.set("a", &"1".to_string(), None, None).unwrap();
        c.set("c", &"3".to_string(), None, None).unwrap();
        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let got: StdHashMap<String, DecodedValue<String>> = c.get_many(&keys, None).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got["a"], DecodedValue::Value("1".to_string()));
        assert_eq!(got["c"], DecodedValue::Value("3".to_string()));
    }

    #[test]
    fn set_many_then_get_many_round_trips() {
        let c = cache();
        let items = vec![
            ("x".to_string(), "1".to_string()),
            ("y".to_string(), "2".to_string()),
        ];
        c.set_many(&items, None, None).unwrap();
        let got: StdHashMap<String, DecodedValue<String>> =
            c.get_many(&["x".to_string(), "y".to_string()], None).unwrap();
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn delete_many_returns_count() {
        let c = cache();
        c.set("a", &"1".to_string(), None, None).unwrap();
        c.set("b", &"2".to_string(), None, None).unwrap();
        let count = c.delete_many(&["a".to_string(), "b".to_string(), "missing".to_string()], None).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn incr_version_moves_value_and_deletes_old() {
        let c = cache();
        c.set("k", &"v".to_string(), None, Some(1)).unwrap();
        let new_version = c.incr_version::<String>("k", 1, Some(1)).unwrap();
        assert_eq!(new_version, 2);
        assert!(!c.has_key("k", Some(1)).unwrap());
        let got: DecodedValue<String> = c.get("k", Some(2)).unwrap().unwrap();
        assert_eq!(got, DecodedValue::Value("v".to_string()));
    }

    #[test]
    fn decr_version_is_the_mirror_of_incr_version() {
        let c = cache();
        c.set("k", &"v".to_string(), None, Some(2)).unwrap();
        let new_version = c.decr_version::<String>("k", 1, Some(2)).unwrap();
        assert_eq!(new_version, 1);
        let got: DecodedValue<String> = c.get("k", Some(1)).unwrap().unwrap();
        assert_eq!(got, DecodedValue::Value("v".to_string()));
    }

    #[test]
    fn zero_timeout_is_never_stored() {
        let c = cache();
        assert!(!c.set("k", &"v".to_string(), Some(0.0), None).unwrap());
        assert!(!c.has_key("k", None).unwrap());
    }

    #[test]
    fn negative_timeout_is_never_stored() {
        let c = cache();
        assert!(!c.set("k", &"v".to_string(), Some(-1.0), None).unwrap());
        assert!(!c.has_key("k", None).unwrap());
    }

    #[test]
    fn long_timeout_is_stored_and_survives() {
        let c = cache();
        assert!(c.set("k", &"v".to_string(), Some(60.0 * 60.0 * 24.0 * 30.0), None).unwrap());
        let got: DecodedValue<String> = c.get("k", None).unwrap().unwrap();
        assert_eq!(got, DecodedValue::Value("v".to_string()));
    }

    #[test]
    fn no_timeout_is_stored_and_never_expires() {
        let c = cache();
        assert!(c.set("k", &"v".to_string(), None, None).unwrap());
        let got: DecodedValue<String> = c.get("k", None).unwrap().unwrap();
        assert_eq!(got, DecodedValue::Value("v".to_string()));
    }

    #[test]
    fn float_timeout_is_truncated_to_whole_seconds() {
        let c = cache();
        // 100.9s truncates to 100s — long enough to still be present.
        assert!(c.set("k", &"v".to_string(), Some(100.9), None).unwrap());
        assert!(c.has_key("k", None).unwrap());
    }

    #[test]
    fn set_surfaces_a_pickle_error_when_the_value_fails_to_serialize() {
        let c = cache();
        let err = c.set("k", &Unserializable, None, None).unwrap_err();
        assert!(matches!(err, Error::PickleError(_)));
        assert!(!c.has_key("k", None).unwrap());
    }

    #[test]
    fn clear_flushes_every_node() {
        let c = cache();
        c.set("a", &"1".to_string(), None, None).unwrap();
        c.clear().unwrap();
        assert!(!c.has_key("a", None).unwrap());
    }

    #[test]
    fn from_config_builds_a_working_ring_cache() {
        let config = ClientConfigBuilder::new()
            .location("node0;node1;node2")
            .unwrap()
            .key_prefix("myapp")
            .build()
            .unwrap();
        let c: Cache<RingClient<MockNode>> = Cache::from_config(&config, |_addr| MockNode::new()).unwrap();

        assert!(c.set("k", &"v".to_string(), None, None).unwrap());
        let got: DecodedValue<String> = c.get("k", None).unwrap().unwrap();
        assert_eq!(got, DecodedValue::Value("v".to_string()));
    }

    #[test]
    fn from_failover_config_builds_a_working_failover_cache() {
        let config = ClientConfigBuilder::new()
            .location("sentinel0")
            .unwrap()
            .min_sentinels(1)
            .key_prefix("myapp")
            .build()
            .unwrap();

        let supervisor = Arc::new(MockSupervisor::new(vec!["mymaster0".to_string()], 3));
        supervisor.set_master_addr("mymaster0", NodeName::new("host-a:6379"));

        let c: Cache<FailoverClient<Arc<MockSupervisor>, Arc<MockNode>>> =
            Cache::from_failover_config(
                &config,
                |_addr| supervisor.clone(),
                |_addr| Arc::new(MockNode::new()),
            )
            .unwrap();

        assert!(c.set("k", &"v".to_string(), None, None).unwrap());
        let got: DecodedValue<String> = c.get("k", None).unwrap().unwrap();
        assert_eq!(got, DecodedValue::Value("v".to_string()));
    }
}
