//! Content identity and deduplication.
//!
//! Two documents are duplicates iff their content is byte-identical after
//! normalization (trim + lowercase). The normalized text is hashed with
//! SHA-256 so the key is stable across processes and can be stored as an
//! index primary key.

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

use crate::model::Document;

/// Normalize content for identity comparison.
pub fn normalize_content(content: &str) -> String {
    content.trim().to_lowercase()
}

/// SHA-256 digest of normalized content, with its hex rendering.
///
/// Serializes as the hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey {
    digest: [u8; 32],
    hex: String,
}

impl ContentKey {
    pub fn of(content: &str) -> Self {
        let output = Sha256::digest(normalize_content(content).as_bytes());
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&output);
        Self {
            digest,
            hex: format!("{:x}", output),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.hex
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// First 16 bytes of the digest, for stores that want UUID-shaped ids.
    pub fn uuid_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&self.digest[..16]);
        bytes
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

impl Serialize for ContentKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hex)
    }
}

/// Streaming first-wins deduplicator.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<ContentKey>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time a content key is offered.
    pub fn admit(&mut self, document: &Document) -> bool {
        self.seen.insert(document.content_key())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Drop later duplicates, keeping the first occurrence and the input order.
pub fn dedup_documents(documents: impl IntoIterator<Item = Document>) -> Vec<Document> {
    let mut dedup = Deduplicator::new();
    documents
        .into_iter()
        .filter(|doc| dedup.admit(doc))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_ignores_case_and_outer_whitespace() {
        assert_eq!(ContentKey::of("  Hello World\n"), ContentKey::of("hello world"));
        assert_ne!(ContentKey::of("hello  world"), ContentKey::of("hello world"));
    }

    #[test]
    fn test_key_is_stable_sha256() {
        // sha256("abc")
        assert_eq!(
            ContentKey::of("ABC ").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(ContentKey::of("abc").uuid_bytes()[..4], [0xba, 0x78, 0x16, 0xbf]);
    }

    #[test]
    fn test_uuid_bytes_are_the_digest_prefix() {
        let key = ContentKey::of("  Grid Storage ");
        let expected = Sha256::digest(b"grid storage");
        assert_eq!(key.digest()[..], expected[..]);
        assert_eq!(key.uuid_bytes()[..], expected[..16]);
        assert_eq!(serde_json::to_value(&key).unwrap(), key.as_str());
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let docs = vec![
            Document::new("first", "Same text", "search").with_url("https://a"),
            Document::new("other", "different", "search"),
            Document::new("second", "  same TEXT ", "index").with_url("https://b"),
        ];
        let unique = dedup_documents(docs);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].title, "first");
        assert_eq!(unique[1].title, "other");
    }
}
