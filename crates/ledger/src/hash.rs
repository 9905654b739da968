//! Record digest and the genesis constant.

use sha2::{Digest, Sha256};

/// `hash_previous` of the first record in every tenant chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// `hash_record = SHA-256(canonical_payload ‖ hash_previous)`, upper-case hex.
pub fn record_hash(canonical_payload: &str, hash_previous: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_payload.as_bytes());
    hasher.update(hash_previous.as_bytes());
    hex::encode_upper(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_a_full_length_digest() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert_eq!(record_hash("x", GENESIS_HASH).len(), 64);
    }

    #[test]
    fn digest_matches_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            record_hash("ab", "c"),
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        );
    }

    #[test]
    fn previous_hash_changes_digest() {
        let a = record_hash("payload", GENESIS_HASH);
        let b = record_hash("payload", &a);
        assert_ne!(a, b);
    }
}
