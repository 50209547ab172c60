//! Tag extraction for bucketed placement.
//!
//! A storage key containing a `{...}` segment is "tagged": all keys sharing
//! the same tag co-locate under one map (the "bucket") on one node. The
//! regex is compiled once at construction, not per call.

use regex::Regex;

use crate::error::{Error, Result};

/// The outcome of matching a storage key against the configured tag
/// pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bucket {
    /// Not tagged: placement and the wire command both use the key as-is.
    Plain(String),
    /// Tagged: placement and the wire command both use the literal bucket
    /// string `"{tag}"` as the map-key.
    Tagged(String),
}

impl Bucket {
    /// The bytes that should actually be hashed to pick a node: the bucket
    /// string if tagged, the key itself otherwise.
    pub fn placement_key(&self) -> &str {
        match self {
            Bucket::Plain(k) => k,
            Bucket::Tagged(b) => b,
        }
    }
}

/// Recognizes tagged keys and extracts their bucket identifier.
pub struct TagExtractor {
    regex: Option<Regex>,
}

impl TagExtractor {
    /// `enabled = false` makes `bucket_of` always return `Bucket::Plain`,
    /// matching the `enable_tagging` configuration flag.
    pub fn new(pattern: &str, enabled: bool) -> Result<Self> {
        if !enabled {
            return Ok(Self { regex: None });
        }
        let regex = Regex::new(&format!("(?i){pattern}"))
            .map_err(|e| Error::ImproperlyConfigured(format!("invalid tag regex: {e}")))?;
        Ok(Self { regex: Some(regex) })
    }

    pub fn bucket_of(&self, key: &str) -> Bucket {
        let Some(regex) = &self.regex else {
            return Bucket::Plain(key.to_string());
        };
        match regex.captures(key) {
            Some(caps) => Bucket::Tagged(format!("{{{}}}", caps.get(1).map_or("", |m| m.as_str()))),
            None => Bucket::Plain(key.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_extractor_never_tags() {
        let extractor = TagExtractor::new(r".*\{(.*)\}.*", false).unwrap();
        assert_eq!(
            extractor.bucket_of("ns:1:{T}-a"),
            Bucket::Plain("ns:1:{T}-a".to_string())
        );
    }

    #[test]
    fn recognizes_tagged_key() {
        let extractor = TagExtractor::new(r".*\{(.*)\}.*", true).unwrap();
        assert_eq!(
            extractor.bucket_of("ns:1:{T}-a"),
            Bucket::Tagged("{T}".to_string())
        );
    }

    #[test]
    fn untagged_key_is_plain() {
        let extractor = TagExtractor::new(r".*\{(.*)\}.*", true).unwrap();
        assert_eq!(
            extractor.bucket_of("ns:1:plain-key"),
            Bucket::Plain("ns:1:plain-key".to_string())
        );
    }

    #[test]
    fn same_tag_produces_same_bucket() {
        let extractor = TagExtractor::new(r".*\{(.*)\}.*", true).unwrap();
        assert_eq!(extractor.bucket_of("ns:1:{T}-a"), extractor.bucket_of("ns:1:{T}-b"));
    }

    #[test]
    fn empty_braces_are_a_tagged_empty_bucket_not_plain() {
        let extractor = TagExtractor::new(r".*\{(.*)\}.*", true).unwrap();
        assert_eq!(extractor.bucket_of("ns:1:{}-a"), Bucket::Tagged("{}".to_string()));
    }
}
