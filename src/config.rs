//! Option parsing and validation.
//!
//! Every option is validated eagerly at construction time, never deferred
//! to first use, so a misconfigured client fails before it ever opens a
//! connection.

use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_millis(200);
const DEFAULT_VNODES: usize = 100;

/// Which routing client a [`crate::cache::Cache`] should build on top of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// Plain consistent-hash ring over a fixed node set.
    Ring,
    /// Ring over shard names whose primaries are resolved through a
    /// supervisor quorum (sentinel-style failover).
    Failover,
}

/// Validated client configuration.
///
/// Construct via [`ClientConfigBuilder`]; there is no public way to obtain
/// a `ClientConfig` with an unparsed or out-of-range field.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub locations: Vec<String>,
    pub client_kind: ClientKind,
    pub database: u32,
    pub password: Option<String>,
    pub sentinel_password: Option<String>,
    pub socket_timeout: Duration,
    pub min_sentinels: Option<usize>,
    pub compress: bool,
    pub enable_tagging: bool,
    pub tag_regex: String,
    pub key_prefix: String,
    pub vnodes: usize,
}

/// Builder that validates each option as it is supplied.
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    locations: Vec<String>,
    client_kind: Option<ClientKind>,
    database: Option<u32>,
    password: Option<String>,
    sentinel_password: Option<String>,
    socket_timeout: Option<Duration>,
    min_sentinels: Option<usize>,
    compress: bool,
    enable_tagging: bool,
    tag_regex: Option<String>,
    key_prefix: Option<String>,
    vnodes: Option<usize>,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the `;`-delimited `LOCATION` string into individual
    /// `host:port` entries.
    pub fn location(mut self, location: &str) -> Result<Self> {
        let locations: Vec<String> = location
            .split(';')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if locations.is_empty() {
            return Err(Error::ImproperlyConfigured(
                "`LOCATION` must provide at least one host".into(),
            ));
        }
        self.locations = locations;
        Ok(self)
    }

    pub fn client_kind(mut self, kind: ClientKind) -> Self {
        self.client_kind = Some(kind);
        self
    }

    /// Parses `OPTIONS.DATABASE`; must be a valid non-negative integer.
    pub fn database(mut self, raw: &str) -> Result<Self> {
        let db: u32 = raw
            .parse()
            .map_err(|_| Error::ImproperlyConfigured("`DATABASE` must be a valid integer".into()))?;
        self.database = Some(db);
        Ok(self)
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn sentinel_password(mut self, password: impl Into<String>) -> Self {
        self.sentinel_password = Some(password.into());
        self
    }

    /// Parses `OPTIONS.SOCKET_TIMEOUT` (seconds, may be fractional).
    pub fn socket_timeout(mut self, raw: &str) -> Result<Self> {
        let secs: f64 = raw.parse().map_err(|_| {
            Error::ImproperlyConfigured("`SOCKET_TIMEOUT` must be a valid number type".into())
        })?;
        if secs < 0.0 {
            return Err(Error::ImproperlyConfigured(
                "`SOCKET_TIMEOUT` must not be negative".into(),
            ));
        }
        self.socket_timeout = Some(Duration::from_secs_f64(secs));
        Ok(self)
    }

    pub fn min_sentinels(mut self, n: usize) -> Self {
        self.min_sentinels = Some(n);
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn enable_tagging(mut self, enable: bool) -> Self {
        self.enable_tagging = enable;
        self
    }

    pub fn tag_regex(mut self, pattern: impl Into<String>) -> Self {
        self.tag_regex = Some(pattern.into());
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn vnodes(mut self, vnodes: usize) -> Self {
        self.vnodes = Some(vnodes);
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        if self.locations.is_empty() {
            return Err(Error::ImproperlyConfigured(
                "`LOCATION` must provide at least one host".into(),
            ));
        }
        let min_sentinels = self
            .min_sentinels
            .or_else(|| Some(self.locations.len() / 2));
        Ok(ClientConfig {
            locations: self.locations,
            client_kind: self.client_kind.unwrap_or(ClientKind::Ring),
            database: self.database.unwrap_or(0),
            password: self.password,
            sentinel_password: self.sentinel_password,
            socket_timeout: self.socket_timeout.unwrap_or(DEFAULT_SOCKET_TIMEOUT),
            min_sentinels,
            compress: self.compress,
            enable_tagging: self.enable_tagging,
            tag_regex: self.tag_regex.unwrap_or_else(|| r".*\{(.*)\}.*".to_string()),
            key_prefix: self.key_prefix.unwrap_or_else(|| "ringcache".to_string()),
            vnodes: self.vnodes.unwrap_or(DEFAULT_VNODES),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_location() {
        let err = ClientConfigBuilder::new().location("   ;  ").unwrap_err();
        assert!(matches!(err, Error::ImproperlyConfigured(_)));
    }

    #[test]
    fn rejects_non_numeric_database() {
        let err = ClientConfigBuilder::new().database("nope").unwrap_err();
        assert!(matches!(err, Error::ImproperlyConfigured(_)));
    }

    #[test]
    fn rejects_non_numeric_timeout() {
        let err = ClientConfigBuilder::new().socket_timeout("nope").unwrap_err();
        assert!(matches!(err, Error::ImproperlyConfigured(_)));
    }

    #[test]
    fn defaults_min_sentinels_to_half_of_locations() {
        let cfg = ClientConfigBuilder::new()
            .location("a:1;b:2;c:3;d:4")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(cfg.min_sentinels, Some(2));
    }

    #[test]
    fn parses_locations() {
        let cfg = ClientConfigBuilder::new()
            .location("localhost:9500; localhost:9501 ;localhost:9502")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            cfg.locations,
            vec!["localhost:9500", "localhost:9501", "localhost:9502"]
        );
    }
}
