//! Byte-exact prompt fingerprinting for the LLM response cache.
//!
//! A fingerprint is the SHA-256 digest of the raw UTF-8 prompt bytes with no
//! normalization: two prompts hit the same cache entry only when they are
//! byte-identical.

use std::fmt::Display;

use sha2::{Digest, Sha256};

/// Hex-rendered SHA-256 digest used as an LLM cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Digest the exact bytes of `text`.
    pub fn of(text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_byte_exact() {
        let a = Fingerprint::of("repair this hunk");
        let b = Fingerprint::of("repair this hunk");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);

        // No normalization: trailing whitespace changes the key.
        let c = Fingerprint::of("repair this hunk ");
        assert_ne!(a, c);
    }

    #[test]
    fn known_digest() {
        // sha256 of the empty string.
        assert_eq!(
            Fingerprint::of("").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
