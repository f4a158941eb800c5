// Fault injection
//
// A vote strategy decides which digest a replica puts into the PREPARE and
// COMMIT votes it sends. The honest strategy reports the entry's digest; the
// corrupting strategy reports a fixed sentinel, simulating a byzantine peer
// that votes for the wrong content. The state machine only ever calls
// `vote_digest` and never branches on which strategy is installed.

use crate::crypto::Digest;
use std::fmt::Debug;

/// Transformation applied to outgoing vote content
pub trait VoteStrategy: Send + Sync + Debug {
    /// Digest to report in an outgoing vote for an entry with digest `honest`
    fn vote_digest(&self, honest: Digest) -> Digest;

    /// Whether this strategy deviates from the protocol
    fn is_byzantine(&self) -> bool {
        false
    }
}

/// Reports the digest unchanged
#[derive(Clone, Copy, Debug, Default)]
pub struct Honest;

impl VoteStrategy for Honest {
    fn vote_digest(&self, honest: Digest) -> Digest {
        honest
    }
}

/// Replaces every digest with the sentinel
#[derive(Clone, Copy, Debug, Default)]
pub struct CorruptDigest;

impl VoteStrategy for CorruptDigest {
    fn vote_digest(&self, _honest: Digest) -> Digest {
        Digest::sentinel()
    }

    fn is_byzantine(&self) -> bool {
        true
    }
}
