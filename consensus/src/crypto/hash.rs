/// Content digests for ledger entries
///
/// Entries are bound to their position and payload by a SHA-256 digest.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

pub const DIGEST_SIZE: usize = 32;

/// Digest output (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest([u8; DIGEST_SIZE]);

impl Digest {
    pub fn new(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Well-known zero value linked from the genesis entry
    pub fn zero() -> Self {
        Self([0u8; DIGEST_SIZE])
    }

    /// Fixed value carried by corrupted votes under fault injection.
    /// No honest entry hashes to it in practice.
    pub fn sentinel() -> Self {
        Self([0xffu8; DIGEST_SIZE])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Incremental SHA-256 over a sequence of fields
#[derive(Default)]
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: impl AsRef<[u8]>) -> &mut Self {
        self.inner.update(data.as_ref());
        self
    }

    pub fn finalize(self) -> Digest {
        Digest::new(self.inner.finalize().into())
    }
}

/// Hash arbitrary data
pub fn hash_data(data: &[u8]) -> Digest {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_hash_collision_resistance() {
        let mut digests = HashSet::new();
        let count = 10_000;

        for i in 0..count {
            let data = format!("entry_{}", i);
            digests.insert(hash_data(data.as_bytes()));
        }

        assert_eq!(digests.len(), count);
    }

    #[test]
    fn test_hash_consistency() {
        let data = b"test data";
        assert_eq!(hash_data(data), hash_data(data));

        let large = testutil::random_bytes(4096);
        assert_eq!(hash_data(&large), hash_data(&large));
    }

    #[test]
    fn test_hash_avalanche() {
        let a = hash_data(b"payload-0");
        let b = hash_data(b"payload-1");

        let differing_bits: u32 = a
            .as_bytes()
            .iter()
            .zip(b.as_bytes())
            .map(|(x, y)| (x ^ y).count_ones())
            .sum();

        // A one-byte change should flip roughly half of the 256 bits
        assert!(differing_bits > 64, "only {} bits differ", differing_bits);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut hasher = Hasher::new();
        hasher.update(b"hello ").update(b"world");

        assert_eq!(hasher.finalize(), hash_data(b"hello world"));
    }

    #[test]
    fn test_digest_display() {
        let digest = hash_data(b"test");

        // First 8 bytes in hex
        assert_eq!(format!("{}", digest).len(), 16);
        assert_eq!(digest.to_hex().len(), 64);
    }

    #[test]
    fn test_well_known_digests() {
        assert_eq!(Digest::zero().as_bytes(), &[0u8; DIGEST_SIZE]);
        assert_eq!(Digest::sentinel().as_bytes(), &[0xffu8; DIGEST_SIZE]);
        assert_ne!(Digest::zero(), Digest::sentinel());
    }
}
