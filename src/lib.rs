//! Sharded cache client: a consistent-hash ring of independent key-value
//! nodes, with optional tag-grouping and sentinel-aware failover.
//!
//! The downstream single-node KV protocol and the supervisor/sentinel wire
//! protocol are external collaborators — this crate only defines the typed
//! [`node::NodeDriver`] / [`node::SupervisorDriver`] dispatch surface an
//! implementation must expose, and routes calls across whichever set of
//! drivers it is given.

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod keyspace;
pub mod node;
pub mod ring;
pub mod routing;
pub mod script_cache;
pub mod tag;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use cache::Cache;
pub use config::{ClientConfig, ClientConfigBuilder, ClientKind};
pub use error::{Error, Result};
pub use node::{NodeDriver, NodeName, SupervisorDriver};
pub use routing::{FailoverClient, Router, RingClient};
