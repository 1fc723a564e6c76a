use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a session identifier, used as the Redis key suffix
/// for `directory:session:*` and as the member of the per-user session index.
///
/// A session id is a bearer credential: anyone who can read the registry
/// could otherwise replay every live session. Only the digest is stored, so a
/// dump of Redis reveals which users hold sessions but not how to present one.
pub fn hash_session_id(session_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(hash_session_id("sess-1"), hash_session_id("sess-1"));
    }

    #[test]
    fn test_matches_known_sha256_digest() {
        assert_eq!(
            hash_session_id("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_distinct_ids_hash_apart() {
        assert_ne!(hash_session_id("sess-1"), hash_session_id("sess-2"));
    }

    #[test]
    fn test_hash_is_lowercase_hex() {
        let hash = hash_session_id("any");

        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
