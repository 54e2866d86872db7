//! Request fingerprints.
//!
//! A fingerprint is the deterministic key under which a response is cached
//! and under which concurrent identical requests are coalesced. Two requests
//! that differ only in query parameter order, duplicate slashes, a trailing
//! slash or method case produce the same fingerprint.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A deterministic request key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps an explicit key without normalization.
    pub fn key(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Builds a fingerprint from a method and a request target
    /// (`/path?query#fragment`).
    ///
    /// The fragment is dropped, empty path segments and empty query pairs
    /// are removed, and the remaining query pairs are sorted.
    pub fn request(method: &str, target: &str) -> Self {
        let target = target.split('#').next().unwrap_or_default();
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
        pairs.sort_unstable();

        let mut key = format!(
            "{} /{}",
            method.trim().to_ascii_uppercase(),
            segments.join("/")
        );
        if !pairs.is_empty() {
            key.push('?');
            key.push_str(&pairs.join("&"));
        }

        Self(key)
    }

    /// Appends the SHA-256 digest of a request body.
    pub fn with_body(self, body: &[u8]) -> Self {
        let digest = Sha256::digest(body);
        Self(format!("{}#{}", self.0, hex::encode(digest)))
    }

    /// Returns the fingerprint as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Fingerprint {
    fn from(key: &str) -> Self {
        Self::key(key)
    }
}

impl From<String> for Fingerprint {
    fn from(key: String) -> Self {
        Self(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_request_normalizes_method_and_path() {
        let fp = Fingerprint::request("get", "//api/products//42/");
        assert_eq!(fp.as_str(), "GET /api/products/42");
    }

    #[test]
    fn test_request_sorts_query_and_drops_fragment() {
        let a = Fingerprint::request("GET", "/search?q=rust&page=2#results");
        let b = Fingerprint::request("GET", "/search/?page=2&&q=rust");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "GET /search?page=2&q=rust");
    }

    #[test]
    fn test_root_path() {
        assert_eq!(Fingerprint::request("HEAD", "").as_str(), "HEAD /");
        assert_eq!(Fingerprint::request("HEAD", "/?").as_str(), "HEAD /");
    }

    #[test]
    fn test_methods_are_distinct() {
        let get = Fingerprint::request("GET", "/orders");
        let post = Fingerprint::request("POST", "/orders");
        assert_ne!(get, post);
    }

    #[test]
    fn test_with_body_distinguishes_payloads() {
        let a = Fingerprint::request("POST", "/query").with_body(b"{\"id\":1}");
        let b = Fingerprint::request("POST", "/query").with_body(b"{\"id\":2}");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("POST /query#"));
        assert_eq!(a.as_str().len(), "POST /query#".len() + 64);
    }

    #[test]
    fn test_explicit_key_is_verbatim() {
        let fp = Fingerprint::key("user:42:profile");
        assert_eq!(fp.to_string(), "user:42:profile");
        assert_eq!(Fingerprint::from("user:42:profile"), fp);
    }

    #[test]
    fn test_serde_transparent() {
        let fp = Fingerprint::request("GET", "/a?b=1");
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, "\"GET /a?b=1\"");
    }

    fn query_pairs() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(("[a-z]{1,6}", "[a-z0-9]{0,6}"), 0..8)
            .prop_map(|pairs| pairs.into_iter().map(|(k, v)| format!("{k}={v}")).collect())
    }

    proptest! {
        /// Property: query parameter order never changes the fingerprint
        #[test]
        fn prop_query_order_invariant(pairs in query_pairs(), seed in any::<u64>()) {
            let mut shuffled = pairs.clone();
            let len = shuffled.len().max(1);
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();

            let a = Fingerprint::request("GET", &format!("/items?{}", pairs.join("&")));
            let b = Fingerprint::request("GET", &format!("/items?{}", shuffled.join("&")));
            prop_assert_eq!(a, b);
        }

        /// Property: normalization is idempotent
        #[test]
        fn prop_normalization_idempotent(path in "(/[a-z]{0,4}){0,5}", pairs in query_pairs()) {
            let once = Fingerprint::request("get", &format!("{}?{}", path, pairs.join("&")));
            let target = once.as_str().split_once(' ').map(|(_, t)| t.to_string()).unwrap_or_default();
            let twice = Fingerprint::request("GET", &target);
            prop_assert_eq!(once, twice);
        }
    }
}
