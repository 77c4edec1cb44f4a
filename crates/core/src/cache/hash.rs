//! Request key generation.

use sha2::{Digest, Sha256};

use crate::http::AcceptFamily;

/// Compute the cache key for a request.
///
/// The key covers method and canonical URL only; canonicalization (host case,
/// fragments, cache-busting parameters) happens before this is called.
pub fn compute_cache_key(method: &str, canonical_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Canonical identity of a cacheable request.
///
/// `accept_family` rides along for fallback selection and is recorded with
/// the stored entry, but it is not part of the identity: a manifest fetch and
/// a browser request for the same stylesheet hit the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub hash: String,
    pub url: String,
    pub method: String,
    pub accept_family: Option<AcceptFamily>,
}

impl RequestKey {
    pub fn new(method: &str, canonical_url: &str, accept_family: Option<AcceptFamily>) -> Self {
        Self {
            hash: compute_cache_key(method, canonical_url),
            url: canonical_url.to_string(),
            method: method.to_ascii_uppercase(),
            accept_family,
        }
    }

    pub fn get(canonical_url: &str) -> Self {
        Self::new("GET", canonical_url, None)
    }
}
