//! Error taxonomy for the cache client.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the cache client.
///
/// Transport failures (`Timeout`, `ConnectionError`, `Driver`) are never
/// retried here; retry policy belongs to the caller, per the core's
/// no-retry design.
#[derive(Debug, Error)]
pub enum Error {
    /// A required option was missing, or an option value failed to parse.
    #[error("improperly configured: {0}")]
    ImproperlyConfigured(String),

    /// Failover bootstrap: no supervisor answered `sentinel masters`.
    #[error("no supervisor returned a master list")]
    MastersUnavailable,

    /// Failover bootstrap: a supervisor answered with an empty master set.
    #[error("supervisor quorum reports no masters configured")]
    NoMastersConfigured,

    /// `delete_tag` was called with a tag that itself contains `{…}`.
    #[error("invalid key: tag `{0}` must not itself contain `{{...}}`")]
    InvalidKey(String),

    /// `incr`/`decr` targeted a key that does not exist.
    #[error("value error: key does not exist")]
    ValueError,

    /// A value could not be encoded (or a previously-encoded value could
    /// not be decoded).
    #[error("pickle error: {0}")]
    PickleError(String),

    /// The per-call socket deadline elapsed.
    #[error("timeout")]
    Timeout,

    /// The underlying driver could not reach a node.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Any other error surfaced by a `NodeDriver`/`SupervisorDriver`
    /// implementation, passed through unchanged.
    #[error("driver error: {0}")]
    Driver(String),
}
