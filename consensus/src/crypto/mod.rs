/// Cryptography module for the PBFT ledger
///
/// Implements:
/// - SHA-256 content digests for ledger entries

pub mod hash;

pub use hash::{hash_data, Digest, Hasher, DIGEST_SIZE};
