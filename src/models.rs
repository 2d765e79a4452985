//! Core data models for the audio gateway

use bytes::Bytes;
use std::fmt;

/// Normalized content identifier
///
/// `decoded` is the fully percent-decoded key and feeds the placement hash;
/// `encoded` is the single-encoded form used for the upstream path and the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalId {
    decoded: String,
    encoded: String,
}

impl CanonicalId {
    pub(crate) fn from_parts(decoded: String, encoded: String) -> Self {
        CanonicalId { decoded, encoded }
    }

    /// The decoded identifier, e.g. `track 1.mp3`
    pub fn decoded(&self) -> &str {
        &self.decoded
    }

    /// The encoded identifier, e.g. `track%201.mp3`
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

/// Result of placing an identifier on the worker pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    /// The identifier that was routed
    pub identifier: CanonicalId,
    /// Index of the selected worker in the pool
    pub worker_index: usize,
    /// Full URL of the object on the selected worker
    pub upstream_url: String,
}

/// Cache key for a complete object
///
/// Derived from the canonical identifier only; range and other request headers
/// never take part, so partial responses cannot collide with full entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build the key for a canonical identifier
    pub fn for_identifier(id: &CanonicalId) -> Self {
        // Format: audio:{encoded id}
        CacheKey(format!("audio:{}", id.encoded()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A complete object stored in the edge cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Origin status, always 200 for admitted entries
    pub status: u16,
    /// Relayed header subset as (name, value) pairs
    pub headers: Vec<(String, String)>,
    /// Full object body
    pub body: Bytes,
}

impl CacheEntry {
    /// Create a new CacheEntry
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Bytes) -> Self {
        CacheEntry {
            status,
            headers,
            body,
        }
    }

    /// Look up a stored header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Approximate memory footprint used for cache size accounting
    pub fn size_bytes(&self) -> usize {
        self.body.len()
            + self
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(decoded: &str, encoded: &str) -> CanonicalId {
        CanonicalId::from_parts(decoded.to_string(), encoded.to_string())
    }

    #[test]
    fn test_cache_key_uses_encoded_form() {
        let key = CacheKey::for_identifier(&id("track 1.mp3", "track%201.mp3"));
        assert_eq!(key.as_str(), "audio:track%201.mp3");
    }

    #[test]
    fn test_cache_key_uniqueness() {
        let a = CacheKey::for_identifier(&id("a.mp3", "a.mp3"));
        let b = CacheKey::for_identifier(&id("b.mp3", "b.mp3"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_cache_entry_header_lookup() {
        let entry = CacheEntry::new(
            200,
            vec![("content-type".to_string(), "audio/mpeg".to_string())],
            Bytes::from_static(b"abc"),
        );
        assert_eq!(entry.header("Content-Type"), Some("audio/mpeg"));
        assert_eq!(entry.header("etag"), None);
        assert_eq!(entry.size_bytes(), 3 + "content-type".len() + "audio/mpeg".len());
    }
}
