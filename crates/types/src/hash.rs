//! Content hashes.

use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a hash in bytes.
pub const HASH_LENGTH: usize = 32;

/// A 32-byte content hash.
///
/// Blocks are content-addressed by the SHA-256 digest of their header
/// fields; certificates and wire messages reference blocks by this hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_LENGTH]);

impl Hash {
    /// The all-zero hash. Used as the justify target of the genesis block.
    pub const ZERO: Hash = Hash([0u8; HASH_LENGTH]);

    /// Wrap raw bytes as a hash.
    pub const fn from_bytes(bytes: [u8; HASH_LENGTH]) -> Self {
        Hash(bytes)
    }

    /// SHA-256 digest of arbitrary bytes.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Hash::ZERO
    }

    /// Full lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(HASH_LENGTH * 2);
        for b in &self.0 {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First ten hex chars; enough to tell blocks apart in logs.
        for b in &self.0[..5] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..")
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
