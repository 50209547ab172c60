//! Per-routing-client script cache.
//!
//! Append-only: once a node has loaded a given script, it stays loaded for
//! the lifetime of the client. Uses `dashmap`'s lock-free `entry` API for
//! the check-and-insert, so the `sha1` comparison that guards against
//! double-loading never needs an explicit lock.

use dashmap::{DashMap, DashSet};
use sha1::{Digest, Sha1};

use crate::error::Result;
use crate::node::{NodeDriver, NodeName};

/// Maps script text to its SHA-1 hash and the set of nodes known to have
/// loaded it.
#[derive(Default)]
pub struct ScriptCache {
    entries: DashMap<String, (String, DashSet<NodeName>)>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn sha1_hex(script: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(script.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Ensures `script` has been `SCRIPT LOAD`ed on `node`, returning its
    /// SHA-1 hash for use with `EVALSHA`. Only issues `SCRIPT LOAD` the
    /// first time a given `(node, script)` pair is seen.
    pub fn ensure_loaded(
        &self,
        node_name: &NodeName,
        driver: &dyn NodeDriver,
        script: &str,
    ) -> Result<String> {
        let local_sha1 = Self::sha1_hex(script);
        let entry = self
            .entries
            .entry(script.to_string())
            .or_insert_with(|| (local_sha1.clone(), DashSet::new()));

        if entry.1.contains(node_name) {
            return Ok(entry.0.clone());
        }

        let server_sha1 = driver.script_load(script)?;
        debug_assert_eq!(
            server_sha1, local_sha1,
            "server-reported SHA-1 must match the locally computed hash"
        );
        entry.1.insert(node_name.clone());
        Ok(entry.0.clone())
    }
}
