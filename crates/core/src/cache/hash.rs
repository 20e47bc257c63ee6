//! Request key generation.
//!
//! A key identifies "the same resource" within a namespace: method, URL
//! without fragment, and the values of any headers the namespace varies on.

use sha2::{Digest, Sha256};

use crate::model::Request;

/// Compute the cache key for a method, URL, and vary-header pairs.
///
/// Header names are lowercased and sorted so that header order in the
/// original request never changes the key.
pub fn compute_request_key(method: &str, url: &str, vary: &[(String, String)]) -> String {
    let url = url.split('#').next().unwrap_or(url);

    let mut pairs: Vec<(String, &str)> = vary
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str()))
        .collect();
    pairs.sort();

    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    for (name, value) in pairs {
        hasher.update(b"\n");
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Key for `request`, varying on the named headers.
pub fn request_key(request: &Request, vary_headers: &[String]) -> String {
    let vary: Vec<(String, String)> = vary_headers
        .iter()
        .filter_map(|name| request.header(name).map(|v| (name.clone(), v.to_string())))
        .collect();
    compute_request_key(request.method.as_str(), request.url.as_str(), &vary)
}
