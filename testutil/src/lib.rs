/// Testing utilities for the PBFT ledger
///
/// Provides:
/// - Payload generators, including proptest strategies
/// - Loopback address fixtures for transport tests

pub mod fixtures;
pub mod generators;

pub use fixtures::*;
pub use generators::*;
