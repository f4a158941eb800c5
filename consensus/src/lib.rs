/// PBFT Ledger Consensus Layer
///
/// This crate implements a simplified PBFT replication engine with:
/// - A hash-linked, append-only ledger rooted in a shared genesis entry
/// - PROPOSE, PREPARE, COMMIT and optional REPLY voting with `> 2f` quorums
/// - Primary rotation through timeout-driven view changes
/// - Pluggable transports (TCP and in-process) and byzantine vote injection

pub mod crypto;
pub mod fault;
pub mod ledger;
pub mod membership;
pub mod network;
pub mod pacemaker;
pub mod pbft;
pub mod votes;

pub use crypto::{hash_data, Digest};
pub use fault::{CorruptDigest, Honest, VoteStrategy};
pub use ledger::{Entry, Ledger};
pub use membership::{MembershipDirectory, PeerId};
pub use network::{Message, MessageHandler, Transport};
pub use pbft::{ConsensusMode, Replica, ReplicaConfig, ReplicaError};
pub use votes::{Phase, RetentionPolicy};
