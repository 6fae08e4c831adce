//! Content digests. A digest is the SHA-256 of the exact bytes of a blob
//! or manifest, rendered as `sha256:<64 lowercase hex>`. Digests identify
//! content immutably; tags are the only mutable pointers in the system.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

use crate::error::{RegistryError, Result};

/// `sha256:<hex>` content digest. Deserialization goes through
/// [`Digest::parse`], so every constructed value is well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Digest(String);

impl Digest {
    /// Compute the digest of raw bytes.
    pub fn of_bytes(data: &[u8]) -> Self {
        Digest(format!("sha256:{:x}", Sha256::digest(data)))
    }

    /// Parse and validate a `sha256:<64 lowercase hex>` string.
    pub fn parse(s: &str) -> Result<Self> {
        let hex = s.strip_prefix("sha256:").ok_or_else(|| {
            RegistryError::InvalidDigest(format!("missing sha256: prefix: {}", s))
        })?;
        if hex.len() != 64 || !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(RegistryError::InvalidDigest(format!(
                "expected 64 lowercase hex characters after sha256: in {}",
                s
            )));
        }
        Ok(Digest(s.to_string()))
    }

    /// Full `sha256:<hex>` form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex portion without the algorithm prefix.
    pub fn hex(&self) -> &str {
        self.0.strip_prefix("sha256:").unwrap_or(&self.0)
    }

    /// First 12 hex characters, used for short display and build tags.
    pub fn short(&self) -> &str {
        &self.hex()[..12]
    }
}

impl TryFrom<String> for Digest {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self> {
        Digest::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> String {
        digest.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_of_bytes_is_stable() {
        let a = Digest::of_bytes(b"hello");
        let b = Digest::of_bytes(b"hello");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("sha256:"));
        assert_eq!(a.hex().len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn parse_rejects_bad_digests() {
        assert!(Digest::parse("sha256:abc").is_err());
        assert!(Digest::parse("md5:0123456789abcdef").is_err());
        let upper = format!("sha256:{}", "A".repeat(64));
        assert!(Digest::parse(&upper).is_err());

        let good = Digest::of_bytes(b"x");
        assert!(Digest::parse(good.as_str()).is_ok());
    }

    #[test]
    fn deserializing_rejects_malformed_digests() {
        // A crafted document must not smuggle in a short or unprefixed
        // digest; short() relies on the 64-hex shape.
        assert!(serde_json::from_str::<Digest>("\"sha256:abc\"").is_err());
        assert!(serde_json::from_str::<Digest>("\"latest\"").is_err());

        let good = Digest::of_bytes(b"x");
        let json = serde_json::to_string(&good).unwrap();
        assert_eq!(json, format!("\"{}\"", good.as_str()));
        assert_eq!(serde_json::from_str::<Digest>(&json).unwrap(), good);
    }
}
