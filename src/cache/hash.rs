//! Cache key digests

use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Hex characters kept from the digest
const KEY_LENGTH: usize = 16;

/// Key for a query text plus optional serialized options: the first 16 hex
/// characters of their SHA-256 digest.
///
/// A NUL byte separates the query from its options so that moving characters
/// across the boundary changes the key.
pub fn cache_key(query: &str, options: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    if let Some(options) = options {
        hasher.update([0u8]);
        hasher.update(options.as_bytes());
    }

    let digest = hasher.finalize();
    let mut key = String::with_capacity(KEY_LENGTH);
    for byte in digest.iter().take(KEY_LENGTH / 2) {
        let _ = write!(key, "{:02x}", byte);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // sha256("abc") = ba7816bf8f01cfea...
        assert_eq!(cache_key("abc", None), "ba7816bf8f01cfea");
    }

    #[test]
    fn test_options_change_key() {
        let plain = cache_key("Get Computer Name from all machines", None);
        let scoped = cache_key("Get Computer Name from all machines", Some("{\"owner\":\"u1\"}"));

        assert_eq!(plain.len(), 16);
        assert_ne!(plain, scoped);
        assert_eq!(plain, cache_key("Get Computer Name from all machines", None));
    }

    #[test]
    fn test_query_and_options_do_not_run_together() {
        assert_ne!(cache_key("ab", Some("c")), cache_key("a", Some("bc")));
        assert_ne!(cache_key("abc", None), cache_key("ab", Some("c")));
    }
}
