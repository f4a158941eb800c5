/// Vote accounting for the PREPARE, COMMIT and REPLY phases
///
/// Each proposal digest owns an independently locked record holding one
/// voter set per phase. Sets only grow, and a voter is counted once per
/// digest and phase no matter how often its vote is delivered.

use crate::crypto::Digest;
use crate::membership::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Maximum number of faulty peers tolerated among `n`
pub fn max_faults(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// Number of distinct votes forming a quorum certificate (2f + 1)
pub fn quorum_threshold(n: usize) -> usize {
    2 * max_faults(n) + 1
}

/// Quorum predicate: strictly more than 2f votes
pub fn is_quorum(count: usize, n: usize) -> bool {
    count > 2 * max_faults(n)
}

/// Voting phases
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Prepare,
    Commit,
    Reply,
}

impl Phase {
    fn slot(self) -> usize {
        match self {
            Phase::Prepare => 0,
            Phase::Commit => 1,
            Phase::Reply => 2,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Prepare => "prepare",
            Phase::Commit => "commit",
            Phase::Reply => "reply",
        };
        f.write_str(name)
    }
}

/// Votes witnessed for one digest
#[derive(Debug, Default)]
pub struct VoteRecord {
    sequence_index: u64,
    voters: [HashSet<PeerId>; 3],
    certified: [bool; 3],
    /// Set once the entry proposed under this digest reaches the ledger,
    /// whatever digest the ledger assigned it
    appended: bool,
}

impl VoteRecord {
    fn new(sequence_index: u64) -> Self {
        Self {
            sequence_index,
            ..Default::default()
        }
    }

    pub fn sequence_index(&self) -> u64 {
        self.sequence_index
    }

    pub fn count(&self, phase: Phase) -> usize {
        self.voters[phase.slot()].len()
    }

    pub fn has_voted(&self, phase: Phase, voter: &PeerId) -> bool {
        self.voters[phase.slot()].contains(voter)
    }

    pub fn is_appended(&self) -> bool {
        self.appended
    }
}

/// Retention policy for vote records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionPolicy {
    /// Keep every record for the life of the process
    KeepAll,

    /// Keep records for the last N ledger positions
    KeepRecent(u64),
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::KeepRecent(64)
    }
}

impl RetentionPolicy {
    /// Keep the last N positions means: at tail T, keep indices (T-N+1)..=T
    pub fn should_prune(&self, sequence_index: u64, tail_index: u64) -> bool {
        match *self {
            RetentionPolicy::KeepAll => false,
            RetentionPolicy::KeepRecent(n) => tail_index >= n && sequence_index <= tail_index - n,
        }
    }

    fn watermark(&self, tail_index: u64) -> Option<u64> {
        match *self {
            RetentionPolicy::KeepAll => None,
            RetentionPolicy::KeepRecent(n) => tail_index.checked_sub(n),
        }
    }
}

/// Per-digest vote tables
pub struct VoteAccounting {
    records: RwLock<HashMap<Digest, Arc<Mutex<VoteRecord>>>>,
    retention: RetentionPolicy,
    /// Highest pruned sequence index; votes at or below it are stale
    watermark: RwLock<Option<u64>>,
}

impl VoteAccounting {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            retention,
            watermark: RwLock::new(None),
        }
    }

    async fn record(&self, digest: Digest, sequence_index: u64) -> Arc<Mutex<VoteRecord>> {
        if let Some(record) = self.records.read().await.get(&digest) {
            return record.clone();
        }
        self.records
            .write()
            .await
            .entry(digest)
            .or_insert_with(|| Arc::new(Mutex::new(VoteRecord::new(sequence_index))))
            .clone()
    }

    /// Open the record for a proposal. Votes that arrived before the
    /// proposal are kept.
    pub async fn open(&self, digest: Digest, sequence_index: u64) {
        self.record(digest, sequence_index).await;
    }

    /// Add a vote; returns the phase's voter count for the digest
    pub async fn record_vote(
        &self,
        digest: Digest,
        sequence_index: u64,
        phase: Phase,
        voter: PeerId,
    ) -> usize {
        let record = self.record(digest, sequence_index).await;
        let mut record = record.lock().await;
        if record.has_voted(phase, &voter) {
            debug!(%digest, %phase, %voter, "Duplicate vote ignored");
        } else {
            record.voters[phase.slot()].insert(voter);
        }
        record.count(phase)
    }

    pub async fn count(&self, digest: &Digest, phase: Phase) -> usize {
        match self.records.read().await.get(digest) {
            Some(record) => record.lock().await.count(phase),
            None => 0,
        }
    }

    pub async fn has_quorum(&self, digest: &Digest, phase: Phase, n: usize) -> bool {
        is_quorum(self.count(digest, phase).await, n)
    }

    /// Returns true exactly once: the first time `phase` holds a quorum for
    /// `digest`.
    pub async fn certify(&self, digest: &Digest, phase: Phase, n: usize) -> bool {
        let Some(record) = self.records.read().await.get(digest).cloned() else {
            return false;
        };
        let mut record = record.lock().await;
        let slot = phase.slot();
        if record.certified[slot] || !is_quorum(record.count(phase), n) {
            return false;
        }
        record.certified[slot] = true;
        true
    }

    /// Note that the proposal voted on under `digest` has been appended
    pub async fn mark_appended(&self, digest: &Digest) {
        if let Some(record) = self.records.read().await.get(digest).cloned() {
            record.lock().await.appended = true;
        }
    }

    pub async fn is_appended(&self, digest: &Digest) -> bool {
        match self.records.read().await.get(digest).cloned() {
            Some(record) => record.lock().await.is_appended(),
            None => false,
        }
    }

    /// True if votes for this sequence index have already been pruned
    pub async fn is_stale(&self, sequence_index: u64) -> bool {
        matches!(*self.watermark.read().await, Some(mark) if sequence_index <= mark)
    }

    /// Evict records that fall outside the retention window behind `tail_index`.
    /// Returns the number of records removed.
    pub async fn prune(&self, tail_index: u64) -> usize {
        let Some(mark) = self.retention.watermark(tail_index) else {
            return 0;
        };

        let mut records = self.records.write().await;
        let mut evicted = Vec::new();
        for (digest, record) in records.iter() {
            let index = record.lock().await.sequence_index;
            if self.retention.should_prune(index, tail_index) {
                evicted.push(*digest);
            }
        }
        for digest in &evicted {
            records.remove(digest);
        }
        drop(records);

        let mut watermark = self.watermark.write().await;
        if watermark.map_or(true, |current| mark > current) {
            *watermark = Some(mark);
        }

        if !evicted.is_empty() {
            debug!(removed = evicted.len(), watermark = mark, "Pruned vote records");
        }
        evicted.len()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for VoteAccounting {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}
