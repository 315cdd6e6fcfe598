//! Canonical serialization for artifact fingerprints.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: Struct fields serialize in declaration order
//! - Stable Vec order: Vectors serialize in index order
//! - No HashMap allowed: Use BTreeMap for maps in hashed data

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

use crate::error::{PipelineError, Result};

/// Serialize a value to canonical JSON bytes for hashing.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| PipelineError::json("canonical serialization", e))
}

/// Compute canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<u64> {
    let bytes = to_canonical_bytes(value)?;
    Ok(xxh64(&bytes, 0))
}

/// Compute canonical hash and return as hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> Result<String> {
    Ok(format!("{:016x}", canonical_hash(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determinism() {
        let names = vec!["county-register".to_string(), "monuments".to_string()];
        assert_eq!(canonical_hash(&names).unwrap(), canonical_hash(&names).unwrap());
    }

    #[test]
    fn test_order_sensitive() {
        let a = vec!["a", "b"];
        let b = vec!["b", "a"];
        assert_ne!(canonical_hash_hex(&a).unwrap(), canonical_hash_hex(&b).unwrap());
        assert_eq!(canonical_hash_hex(&a).unwrap().len(), 16);
    }
}
