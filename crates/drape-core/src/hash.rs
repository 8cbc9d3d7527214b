//! SHA-256 digests for provider binaries and request payloads

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 digest of some content.
///
/// Attached to canonical models as the fingerprint of the binary a provider
/// returned, and used in logs to correlate request payloads without printing
/// them.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash a byte slice
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Hash several byte slices as one stream, in order
    pub fn from_parts<'a, I>(parts: I) -> Self
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Hex digest with an algorithm prefix, e.g. `sha256:ab12...`
    pub fn to_prefixed_hex(&self) -> String {
        format!("sha256:{}", self.to_hex())
    }

    /// First 12 hex characters, enough to tell payloads apart in logs
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_bytes_same_hash() {
        assert_eq!(ContentHash::from_bytes(b"glTF"), ContentHash::from_bytes(b"glTF"));
        assert_ne!(ContentHash::from_bytes(b"glTF"), ContentHash::from_bytes(b"ply\n"));
    }

    #[test]
    fn test_parts_match_concatenation() {
        let joined = ContentHash::from_bytes(b"front-photoside-photo");
        let parts = ContentHash::from_parts([&b"front-photo"[..], &b"side-photo"[..]]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn test_prefixed_hex_format() {
        let prefixed = ContentHash::from_bytes(b"model").to_prefixed_hex();
        assert!(prefixed.starts_with("sha256:"));
        assert_eq!(prefixed.len(), "sha256:".len() + 64);
    }

    #[test]
    fn test_short_is_prefix_of_hex() {
        let h = ContentHash::from_bytes(b"payload");
        assert_eq!(h.short().len(), 12);
        assert!(h.to_hex().starts_with(&h.short()));
    }
}
