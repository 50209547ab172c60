//! Deterministic storage-key naming.
//!
//! `incr_version`/`decr_version` are deliberately NOT implemented here: per
//! the open question they are carried at the [`crate::cache::Cache`] layer
//! as non-atomic get+set+delete renames, not as a pure function of the key
//! namer.

/// Derives storage keys from a logical key, a version, and a configured
/// prefix: `"{prefix}:{version}:{logical_key}"`.
#[derive(Debug, Clone)]
pub struct KeyNamer {
    prefix: String,
}

impl KeyNamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn storage_key(&self, logical_key: &str, version: u64) -> String {
        format!("{}:{}:{}", self.prefix, version, logical_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_prefix_version_key() {
        let namer = KeyNamer::new("myapp");
        assert_eq!(namer.storage_key("answer", 1), "myapp:1:answer");
        assert_eq!(namer.storage_key("answer", 2), "myapp:2:answer");
    }
}
