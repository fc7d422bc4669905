//! Document and attribute hashing for change detection.
//!
//! Hashes are SHA-256 over the canonical JSON encoding. `serde_json` maps
//! here are ordered, so equal values always hash equal.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::spec::Document;

/// Hasher for documents and resolved attribute maps.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the fingerprint of a whole document.
    ///
    /// Changes to any setting, binding, variable, or resource change it.
    #[must_use]
    pub fn hash_document(&self, document: &Document) -> String {
        Self::hash_serializable(document)
    }

    /// Computes the hash of a resolved attribute map.
    #[must_use]
    pub fn hash_attributes(&self, attributes: &BTreeMap<String, Value>) -> String {
        Self::hash_serializable(attributes)
    }

    fn hash_serializable<T: Serialize>(value: &T) -> String {
        let mut hasher = Sha256::new();
        let bytes = serde_json::to_vec(value).unwrap_or_default();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes in constant time.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
