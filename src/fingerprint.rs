// src/fingerprint.rs
//! Content fingerprints: SHA-256 of the raw note body, compared for equality only.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(body: &str) -> Self {
        let digest = Sha256::digest(body.as_bytes());
        let mut out = String::with_capacity(64);
        for b in digest.iter() {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars; enough to correlate log lines without leaking content.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn fingerprint(body: &str) -> Fingerprint {
    Fingerprint::of(body)
}

/// True iff the body differs from the last known fingerprint (or none is known).
/// Empty bodies never count as a change.
pub fn changed(body: &str, last_known: Option<&Fingerprint>) -> bool {
    if body.trim().is_empty() {
        return false;
    }
    match last_known {
        None => true,
        Some(fp) => Fingerprint::of(body) != *fp,
    }
}

/// Last fingerprint seen per item id.
#[derive(Debug, Default, Clone)]
pub struct FingerprintCache {
    known: HashMap<String, Fingerprint>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, item_id: &str) -> Option<&Fingerprint> {
        self.known.get(item_id)
    }

    pub fn record(&mut self, item_id: &str, fp: Fingerprint) {
        self.known.insert(item_id.to_string(), fp);
    }

    pub fn forget(&mut self, item_id: &str) {
        self.known.remove(item_id);
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

impl FromIterator<(String, Fingerprint)> for FingerprintCache {
    fn from_iter<I: IntoIterator<Item = (String, Fingerprint)>>(iter: I) -> Self {
        Self {
            known: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bodies_share_a_fingerprint() {
        let a = fingerprint("How do I test async APIs?");
        let b = fingerprint("How do I test async APIs?");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_ne!(a, fingerprint("How do I test async APIs?!"));
    }

    #[test]
    fn changed_without_prior_fingerprint() {
        assert!(changed("new note", None));
    }

    #[test]
    fn unchanged_when_fingerprint_matches() {
        let fp = fingerprint("same");
        assert!(!changed("same", Some(&fp)));
        assert!(changed("different", Some(&fp)));
    }

    #[test]
    fn empty_body_is_never_a_change() {
        assert!(!changed("", None));
        assert!(!changed("   \n\t", None));
        let fp = fingerprint("before");
        assert!(!changed("", Some(&fp)));
    }

    #[test]
    fn cache_records_and_forgets() {
        let mut c = FingerprintCache::new();
        c.record("a", fingerprint("x"));
        assert_eq!(c.get("a"), Some(&fingerprint("x")));
        c.forget("a");
        assert!(c.is_empty());
    }
}
