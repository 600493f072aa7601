//! Content hashing for version tokens and cache keys.
//!
//! Hashes cover the full byte content, so two different contents of the same
//! length never share a hash.

use sha2::{Digest, Sha256};

use super::traits::VersionToken;

/// SHA-256 of a file's content, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute hash from content bytes.
    pub fn from_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Use the hash as a version token (content-addressed revisions).
    pub fn into_token(self) -> VersionToken {
        VersionToken::new(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_deterministic() {
        let hash1 = ContentHash::from_content("hello world");
        let hash2 = ContentHash::from_content("hello world");
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_same_length_different_hash() {
        let hash1 = ContentHash::from_content("abc");
        let hash2 = ContentHash::from_content("abd");
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_hash_as_str() {
        let hash = ContentHash::from_content("test");
        // SHA-256 hex is 64 characters
        assert_eq!(hash.as_str().len(), 64);
    }
}
