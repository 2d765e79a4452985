//! Identifier extraction and canonicalization

use crate::error::{GatewayError, Result};
use crate::models::CanonicalId;
use http::Uri;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::debug;

/// Characters left unescaped in an encoded identifier
///
/// Same unreserved set as `encodeURIComponent`: `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Extracts the content identifier from inbound requests
#[derive(Debug, Clone)]
pub struct IdentifierNormalizer {
    path_prefix: String,
}

impl IdentifierNormalizer {
    /// Create a normalizer that strips `path_prefix` before reading path segments
    pub fn new(path_prefix: impl Into<String>) -> Self {
        let path_prefix = path_prefix.into().trim_end_matches('/').to_string();
        IdentifierNormalizer { path_prefix }
    }

    /// Extract and canonicalize the identifier of a request
    ///
    /// A non-empty `id` query parameter takes priority; otherwise the last
    /// non-empty path segment after the route prefix is used.
    ///
    /// # Returns
    /// * `Ok(CanonicalId)` for a usable identifier
    /// * `Err(GatewayError::MissingIdentifier)` if neither source yields one
    pub fn normalize(&self, uri: &Uri) -> Result<CanonicalId> {
        let raw = self
            .query_identifier(uri)
            .or_else(|| self.path_identifier(uri))
            .ok_or(GatewayError::MissingIdentifier)?;

        let id = canonicalize(raw);
        if id.decoded().is_empty() {
            return Err(GatewayError::MissingIdentifier);
        }

        debug!("Normalized identifier: raw={} canonical={}", raw, id);
        Ok(id)
    }

    fn query_identifier<'a>(&self, uri: &'a Uri) -> Option<&'a str> {
        uri.query()?
            .split('&')
            .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
            .find(|(key, _)| *key == "id")
            .map(|(_, value)| value)
            .filter(|value| !value.is_empty())
    }

    fn path_identifier<'a>(&self, uri: &'a Uri) -> Option<&'a str> {
        let path = uri.path();
        let rest = if self.path_prefix.is_empty() {
            path
        } else {
            match path.strip_prefix(self.path_prefix.as_str()) {
                Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
                _ => path,
            }
        };

        rest.split('/').filter(|segment| !segment.is_empty()).last()
    }
}

/// Canonicalize a raw identifier token
///
/// Literal `+` becomes a space, percent-escapes are decoded in a single pass,
/// and the result is encoded exactly once. Escapes that decode to `+` or `%`
/// stay literal characters of the identifier. Decoding an `encoded` value
/// returns `decoded` unchanged, so canonicalizing a canonical id is a no-op.
pub fn canonicalize(raw: &str) -> CanonicalId {
    let decoded = percent_decode_str(&raw.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned();

    let encoded = utf8_percent_encode(&decoded, COMPONENT).to_string();
    CanonicalId::from_parts(decoded, encoded)
}
