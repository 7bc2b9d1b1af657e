//! Fingerprints for general cache entries.

use sha2::{Digest, Sha256};

/// Compute the cache key for an (entity, data kind) pair.
///
/// The entity name is lowercased so "Oak School" and "oak school" share an
/// entry; the data kind is used as given.
pub fn compute_cache_key(entity_name: &str, data_kind: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_name.to_lowercase().as_bytes());
    hasher.update(b":");
    hasher.update(data_kind.as_bytes());
    hex::encode(hasher.finalize())
}
