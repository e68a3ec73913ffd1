//! SHA-256 checksums for cached objects.

use sha2::{Digest, Sha256};
use std::fmt;

/// Name under which SHA-256 is registered in the inventory.
pub const SHA256: &str = "sha256";

/// A SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Compute the checksum of a buffer.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Create an incremental hasher.
    pub fn hasher() -> ChecksumHasher {
        ChecksumHasher(Sha256::new())
    }

    /// Encode as lowercase hex.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// True if `hex` names this digest (case-insensitive).
    pub fn matches_hex(&self, hex: &str) -> bool {
        self.to_hex().eq_ignore_ascii_case(hex.trim())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental SHA-256 hasher.
pub struct ChecksumHasher(Sha256);

impl ChecksumHasher {
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> Checksum {
        Checksum(self.0.finalize().into())
    }
}
