//! User metadata attached to stored objects.
//!
//! The only key this crate interprets is `digest`: the hex SHA-256 of the
//! stored payload. Consumers compare digests to detect content changes
//! without downloading.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// String-to-string metadata map, ordered for stable comparisons.
pub type Metadata = BTreeMap<String, String>;

pub const DIGEST_KEY: &str = "digest";

/// Hex-encoded SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Metadata for a fresh write: `{digest}` when one is supplied, else empty.
pub fn digest_metadata(digest: Option<&str>) -> Metadata {
    let mut metadata = Metadata::new();
    if let Some(digest) = digest.filter(|d| !d.is_empty()) {
        metadata.insert(DIGEST_KEY.to_string(), digest.to_string());
    }
    metadata
}

/// Merge `updates` over `existing`. Keys only in `existing` survive;
/// overlapping keys take the new value.
pub fn merge(existing: &Metadata, updates: Metadata) -> Metadata {
    let mut merged = existing.clone();
    merged.extend(updates);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_known_input() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn blank_digest_adds_nothing() {
        assert!(digest_metadata(None).is_empty());
        assert!(digest_metadata(Some("")).is_empty());
        assert_eq!(
            digest_metadata(Some("cafe")).get(DIGEST_KEY).map(String::as_str),
            Some("cafe")
        );
    }

    #[test]
    fn merge_keeps_untouched_keys() {
        let existing = Metadata::from([
            ("digest".to_string(), "old".to_string()),
            ("owner".to_string(), "alice".to_string()),
        ]);
        let merged = merge(
            &existing,
            Metadata::from([("digest".to_string(), "new".to_string())]),
        );
        assert_eq!(merged["digest"], "new");
        assert_eq!(merged["owner"], "alice");
        assert_eq!(merged.len(), 2);
    }
}
