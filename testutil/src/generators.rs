/// Test data generators

use proptest::prelude::*;
use rand::Rng;

/// Generate random bytes
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

/// Random printable payload, the shape a shell `submit` produces
pub fn random_payload() -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(1..=64);
    (0..len).map(|_| rng.gen_range(b' '..=b'~')).collect()
}

/// Up to `max` arbitrary payloads, possibly empty or repeated
pub fn payloads_strategy(max: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..128), 0..=max)
}
