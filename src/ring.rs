//! Consistent hash ring with virtual nodes.
//!
//! # Algorithm
//!
//! Each physical node is given `V` virtual positions on a ring, the hash of
//! `"{node_name}:{virtual_index}"` for `virtual_index` in `[0, V)`. Looking
//! up a key hashes it the same way and walks clockwise (the right-bisect of
//! the sorted virtual-position sequence) to the first position whose hash
//! is strictly greater than the key's hash, wrapping back to index 0 if the
//! key's hash is greater than every virtual position.
//!
//! Hashing is 128-bit MD5, compared as raw digest bytes rather than the hex
//! string — lexicographic order over the digest bytes is identical to
//! lexicographic order over the lowercase hex encoding, so there is no need
//! to allocate a `String` per comparison (see `other_examples/cc8dc954`'s
//! `Shopify-async-memcached` ring for the same continuum-of-points shape,
//! built on a cheaper 32-bit hash).
//!
//! # Properties
//!
//! - Adding or removing a node perturbs `~1/N` of existing mappings.
//! - With `V >= 100` virtual positions per node, load is uniform to within
//!   about 20% across nodes.

use std::fmt;

/// Stable textual identity of a backend node: either `host:port` or, under
/// failover, the logical shard name (e.g. `mymaster3`). Equality and
/// hashing are by name, per the data model.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeName(pub String);

impl NodeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// 128-bit MD5 digest, compared byte-for-byte (equivalent to comparing the
/// hex digest lexicographically).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Digest([u8; 16]);

impl Digest {
    fn of(data: &[u8]) -> Self {
        Digest(md5::compute(data).0)
    }
}

/// Default number of virtual positions per physical node.
pub const DEFAULT_VNODES: usize = 100;

/// A consistent-hash ring over a set of named nodes.
///
/// Not internally synchronized — wrap in a lock if mutated from multiple
/// threads. In the current design `add_node`/`remove_node` are not called
/// from the request path (see module docs on the routing client), so a
/// single-threaded build followed by read-only lookups is the common case.
#[derive(Debug, Clone)]
pub struct HashRing {
    vnodes: usize,
    nodes: Vec<NodeName>,
    /// Sorted by `Digest`; invariant checked by `debug_assert` after every
    /// mutation.
    positions: Vec<(Digest, NodeName)>,
}

impl HashRing {
    /// Builds a ring over `nodes` with `vnodes` virtual positions each.
    ///
    /// Fails if `nodes` is empty.
    pub fn new<I, S>(nodes: I, vnodes: usize) -> crate::error::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeName>,
    {
        let mut ring = HashRing {
            vnodes,
            nodes: Vec::new(),
            positions: Vec::new(),
        };
        for node in nodes {
            ring.add_node(node.into());
        }
        if ring.nodes.is_empty() {
            return Err(crate::error::Error::ImproperlyConfigured(
                "hash ring requires at least one node".into(),
            ));
        }
        Ok(ring)
    }

    fn vnode_digest(node: &NodeName, index: usize) -> Digest {
        Digest::of(format!("{}:{}", node.0, index).as_bytes())
    }

    /// Inserts `V` virtual positions for `node`. No-op if `node` is already
    /// present.
    pub fn add_node(&mut self, node: NodeName) {
        if self.nodes.contains(&node) {
            return;
        }
        for i in 0..self.vnodes {
            let digest = Self::vnode_digest(&node, i);
            let idx = self.positions.partition_point(|(d, _)| *d < digest);
            self.positions.insert(idx, (digest, node.clone()));
        }
        self.nodes.push(node);
        debug_assert!(self.positions.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    /// Removes every virtual position owned by `node`. No-op if absent.
    pub fn remove_node(&mut self, node: &NodeName) {
        if !self.nodes.contains(node) {
            return;
        }
        self.positions.retain(|(_, n)| n != node);
        self.nodes.retain(|n| n != node);
        debug_assert!(self.positions.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    /// Returns the node owning `key`, or `None` iff the ring is empty.
    ///
    /// Uses a right-bisect (strict upper bound): a key whose hash equals a
    /// virtual position's hash maps to the *next* position, wrapping to
    /// index 0 past the end.
    pub fn get(&self, key: &[u8]) -> Option<&NodeName> {
        if self.positions.is_empty() {
            return None;
        }
        let digest = Digest::of(key);
        let idx = self.positions.partition_point(|(d, _)| *d <= digest);
        let idx = if idx == self.positions.len() { 0 } else { idx };
        Some(&self.positions[idx].1)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn vnode_count(&self) -> usize {
        self.positions.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeName> {
        self.nodes.iter()
    }
}
