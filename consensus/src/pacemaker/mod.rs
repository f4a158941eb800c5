// Pacemaker and view-change bookkeeping
//
// Outstanding proposals are guarded by a timer. When a proposal fails to
// reach the ledger before the timer expires the replica votes to move to the
// next view, which rotates the primary. Timeouts back off exponentially until
// an append succeeds.

use crate::membership::PeerId;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Timeout schedule for outstanding proposals
#[derive(Clone, Debug)]
pub struct Pacemaker {
    /// Timeout for the first stalled proposal
    base_timeout: Duration,

    /// Upper bound on the backed-off timeout
    max_timeout: Duration,

    /// Consecutive timeouts since the last successful append
    timeout_count: u32,
}

impl Pacemaker {
    pub fn new(base_timeout: Duration, max_timeout: Duration) -> Self {
        Self {
            base_timeout,
            max_timeout: max_timeout.max(base_timeout),
            timeout_count: 0,
        }
    }

    /// Formula: min(base_timeout * 2^timeout_count, max_timeout)
    pub fn next_timeout(&self) -> Duration {
        let multiplier = 2u32.saturating_pow(self.timeout_count);
        self.base_timeout
            .saturating_mul(multiplier)
            .min(self.max_timeout)
    }

    /// Called when a proposal timer fires without progress
    pub fn record_timeout(&mut self) {
        self.timeout_count = self.timeout_count.saturating_add(1);
    }

    /// Called on a successful append
    pub fn reset(&mut self) {
        self.timeout_count = 0;
    }

    pub fn timeout_count(&self) -> u32 {
        self.timeout_count
    }
}

/// Distinct view-change voters per target view
#[derive(Debug, Default)]
pub struct ViewChangeTracker {
    votes: BTreeMap<u64, HashSet<PeerId>>,
}

impl ViewChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a vote to move to `new_view`; returns the number of distinct
    /// voters for that view
    pub fn record(&mut self, new_view: u64, voter: PeerId) -> usize {
        let voters = self.votes.entry(new_view).or_default();
        voters.insert(voter);
        voters.len()
    }

    pub fn count(&self, view: u64) -> usize {
        self.votes.get(&view).map_or(0, HashSet::len)
    }

    /// Drop every counter for views up to and including `view`
    pub fn clear_through(&mut self, view: u64) {
        self.votes = self.votes.split_off(&(view + 1));
    }
}
