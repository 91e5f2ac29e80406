//! Usage: Deterministic cache key for idempotent reads (method + path + query).

use crate::http::request::ApiRequest;
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    digest: String,
    display: String,
}

impl CacheKey {
    pub fn for_request(request: &ApiRequest) -> Self {
        Self::new(request.method.as_str(), &request.path, &request.query)
    }

    pub fn new(method: &str, path: &str, query: &[(String, String)]) -> Self {
        let method = method.trim().to_ascii_uppercase();
        let path = path.trim();

        // Stable sort: repeated names keep their relative order.
        let mut pairs: Vec<&(String, String)> = query.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = Sha256::new();
        hash_part(&mut hasher, method.as_bytes());
        hash_part(&mut hasher, path.as_bytes());
        for (name, value) in &pairs {
            hash_part(&mut hasher, name.as_bytes());
            hash_part(&mut hasher, value.as_bytes());
        }
        let digest = hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>();

        let mut display = format!("{method} {path}");
        if !pairs.is_empty() {
            let rendered = pairs
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("&");
            display.push('?');
            display.push_str(&rendered);
        }

        Self { digest, display }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

fn hash_part(hasher: &mut Sha256, part: &[u8]) {
    hasher.update((part.len() as u64).to_be_bytes());
    hasher.update(part);
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}
