// src/hash.rs

//! SHA-256 hashing for snapshot content addressing and journal hash chains.
//!
//! Every pre-image, WAL record and journal entry in this crate is keyed or
//! chained by SHA-256. There is exactly one algorithm in play, so unlike a
//! package manager's CAS layer (which trades cryptographic strength for
//! speed on non-security-critical paths) this module does not expose a
//! choice.

use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};

/// Hash computation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Hash string has the wrong length for SHA-256 (64 hex chars).
    InvalidLength { expected: usize, got: usize },
    /// Hash string contains non-hex characters.
    InvalidHex(String),
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength { expected, got } => {
                write!(f, "invalid hash length: expected {}, got {}", expected, got)
            }
            Self::InvalidHex(s) => write!(f, "invalid hex in hash: {}", s),
        }
    }
}

impl std::error::Error for HashError {}

/// A validated SHA-256 hash, stored as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(String);

const HEX_LEN: usize = 64;

impl Hash {
    /// Validate and wrap a hex string as a `Hash`.
    pub fn new(value: impl Into<String>) -> Result<Self, HashError> {
        let value = value.into();
        if value.len() != HEX_LEN {
            return Err(HashError::InvalidLength {
                expected: HEX_LEN,
                got: value.len(),
            });
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(value));
        }
        Ok(Self(value.to_lowercase()))
    }

    fn new_unchecked(value: String) -> Self {
        Self(value)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Hash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Incremental SHA-256 hasher.
pub struct Hasher(Sha256);

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> Hash {
        Hash::new_unchecked(format!("{:x}", self.0.finalize()))
    }
}

/// Hash a byte slice in one shot.
pub fn hash_bytes(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Hash::new_unchecked(format!("{:x}", hasher.finalize()))
}

/// Hash all bytes produced by a reader, without buffering the whole input.
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<Hash> {
    let mut hasher = Hasher::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize())
}

/// Hash a string, the common case for keying a snapshot by its path.
#[inline]
pub fn hash_str(s: &str) -> Hash {
    hash_bytes(s.as_bytes())
}

/// Convenience accessor returning the raw lowercase hex digest.
#[inline]
pub fn sha256(data: &[u8]) -> String {
    hash_bytes(data).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_sha256_value() {
        let hash = hash_bytes(b"Hello, World!");
        assert_eq!(
            hash.as_str(),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn incremental_matches_one_shot() {
        let full = hash_bytes(b"Hello, World!");
        let mut hasher = Hasher::new();
        hasher.update(b"Hello, ");
        hasher.update(b"World!");
        assert_eq!(full, hasher.finalize());
    }

    #[test]
    fn validation_rejects_bad_length_and_hex() {
        assert!(matches!(
            Hash::new("abc123"),
            Err(HashError::InvalidLength { .. })
        ));
        assert!(matches!(
            Hash::new("g".repeat(64)),
            Err(HashError::InvalidHex(_))
        ));
    }

    #[test]
    fn hash_reader_matches_hash_bytes() {
        let data = b"Hello, World!";
        let mut cursor = std::io::Cursor::new(data);
        let hash = hash_reader(&mut cursor).unwrap();
        assert_eq!(hash, hash_bytes(data));
    }

    #[test]
    fn path_hashing_is_stable() {
        let a = hash_str("src/main.rs");
        let b = hash_str("src/main.rs");
        let c = hash_str("src/lib.rs");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
