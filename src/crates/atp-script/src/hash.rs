//! Content hashing for the transform cache
//!
//! Transform-cache keys are SHA-256 over the raw source bytes. The key
//! only needs determinism and URL-safety, but a content-strength digest
//! keeps distinct programs from ever colliding in the cache.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the source text.
pub fn code_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hash_is_stable() {
        assert_eq!(code_hash("return 1;"), code_hash("return 1;"));
    }

    #[test]
    fn hash_distinguishes_sources() {
        assert_ne!(code_hash("return 1;"), code_hash("return 2;"));
    }

    #[test]
    fn hash_is_hex_of_fixed_width() {
        let hash = code_hash("anything");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    proptest! {
        #[test]
        fn hash_is_deterministic_for_any_input(source in ".*") {
            prop_assert_eq!(code_hash(&source), code_hash(&source));
        }
    }
}
