// Hash-linked append-only ledger
//
// Index 0 is the genesis entry. Every later entry links to the digest of its
// predecessor, and every digest is recomputed from the entry's fields whenever
// validity is checked.

use crate::crypto::{Digest, Hasher};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

/// Payload carried by the genesis entry
pub const GENESIS_PAYLOAD: &[u8] = b"Genesis";

/// Ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid genesis entry: {0}")]
    InvalidGenesis(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// A single ledger entry (block)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub sequence_index: u64,
    /// Creation time in milliseconds since the unix epoch
    pub created_at: u64,
    pub payload: Vec<u8>,
    pub previous_digest: Digest,
    pub digest: Digest,
}

impl Entry {
    /// Create an entry and compute its digest
    pub fn new(
        sequence_index: u64,
        created_at: u64,
        payload: impl Into<Vec<u8>>,
        previous_digest: Digest,
    ) -> Self {
        let mut entry = Self {
            sequence_index,
            created_at,
            payload: payload.into(),
            previous_digest,
            digest: Digest::zero(),
        };
        entry.digest = entry.compute_digest();
        entry
    }

    /// Create the genesis entry
    pub fn genesis(created_at: u64) -> Self {
        Self::new(0, created_at, GENESIS_PAYLOAD, Digest::zero())
    }

    /// Recompute the digest from index, payload, timestamp and previous digest
    pub fn compute_digest(&self) -> Digest {
        let mut hasher = Hasher::new();
        hasher
            .update(self.sequence_index.to_le_bytes())
            .update(&self.payload)
            .update(self.created_at.to_le_bytes())
            .update(self.previous_digest.as_bytes());
        hasher.finalize()
    }

    /// True if the stored digest matches the entry's content
    pub fn is_sealed(&self) -> bool {
        self.digest == self.compute_digest()
    }

    pub fn is_genesis(&self) -> bool {
        self.sequence_index == 0
            && self.previous_digest == Digest::zero()
            && self.payload == GENESIS_PAYLOAD
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Entry(index: {}, created_at: {}, payload: {}, previous: {}, digest: {})",
            self.sequence_index,
            self.created_at,
            String::from_utf8_lossy(&self.payload),
            self.previous_digest,
            self.digest,
        )
    }
}

/// Result of an append attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Entry linked onto the tail under this digest
    Appended(Digest),
    /// Digest already present, ledger untouched
    Duplicate,
}

/// The hash-linked sequence of entries owned by one replica
#[derive(Clone, Debug)]
pub struct Ledger {
    entries: Vec<Entry>,
}

impl Ledger {
    /// Originate a fresh chain rooted at a new genesis entry
    pub fn create_genesis() -> Self {
        let genesis = Entry::genesis(now_millis());
        info!(digest = %genesis.digest, "Created genesis entry");
        Self {
            entries: vec![genesis],
        }
    }

    /// Adopt a genesis entry received from another peer
    pub fn from_genesis(genesis: Entry) -> Result<Self> {
        if !genesis.is_genesis() {
            return Err(LedgerError::InvalidGenesis(format!(
                "entry {} is not a genesis entry",
                genesis.sequence_index
            )));
        }
        if !genesis.is_sealed() {
            return Err(LedgerError::InvalidGenesis(format!(
                "digest {} does not match content",
                genesis.digest
            )));
        }
        Ok(Self {
            entries: vec![genesis],
        })
    }

    /// Link an entry onto the tail and append it.
    ///
    /// Performs no voting logic: the caller must already hold a quorum. The
    /// entry's previous digest is relinked to the current tail and its digest
    /// recomputed. An entry whose digest is already present is skipped.
    pub fn append(&mut self, mut entry: Entry) -> AppendOutcome {
        let proposed = entry.digest;
        entry.previous_digest = self.tail().digest;
        entry.digest = entry.compute_digest();

        if self
            .entries
            .iter()
            .any(|e| e.digest == proposed || e.digest == entry.digest)
        {
            debug!(digest = %proposed, "Entry already in ledger, skipping append");
            return AppendOutcome::Duplicate;
        }

        let digest = entry.digest;
        self.entries.push(entry);
        AppendOutcome::Appended(digest)
    }

    /// Check every link and digest across the whole sequence
    pub fn is_valid(&self) -> bool {
        let Some(genesis) = self.entries.first() else {
            return false;
        };
        if genesis.previous_digest != Digest::zero() || !genesis.is_sealed() {
            return false;
        }

        self.entries.windows(2).all(|pair| {
            let (prev, current) = (&pair[0], &pair[1]);
            current.is_sealed() && current.previous_digest == prev.digest
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn genesis(&self) -> &Entry {
        &self.entries[0]
    }

    pub fn tail(&self) -> &Entry {
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.entries.iter().any(|e| &e.digest == digest)
    }
}

impl fmt::Display for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", entry)?;
        }
        Ok(())
    }
}

/// Current wall-clock time in milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ledger_with(payloads: &[&str]) -> Ledger {
        let mut ledger = Ledger::create_genesis();
        for payload in payloads {
            let entry = Entry::new(
                ledger.len() as u64,
                now_millis(),
                payload.as_bytes(),
                ledger.tail().digest,
            );
            assert!(matches!(ledger.append(entry), AppendOutcome::Appended(_)));
        }
        ledger
    }

    #[test]
    fn test_genesis_creation() {
        let ledger = Ledger::create_genesis();

        assert_eq!(ledger.len(), 1);
        assert!(ledger.genesis().is_genesis());
        assert_eq!(ledger.genesis().previous_digest, Digest::zero());
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_append_links_to_tail() {
        let ledger = ledger_with(&["tx1", "tx2"]);

        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.entries()[1].previous_digest, ledger.entries()[0].digest);
        assert_eq!(ledger.entries()[2].previous_digest, ledger.entries()[1].digest);
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_append_relinks_stale_previous_digest() {
        let mut ledger = ledger_with(&["tx1"]);
        let stale = Entry::new(2, now_millis(), "tx2", Digest::zero());

        let outcome = ledger.append(stale.clone());

        match outcome {
            AppendOutcome::Appended(digest) => assert_ne!(digest, stale.digest),
            AppendOutcome::Duplicate => panic!("expected append"),
        }
        assert_eq!(ledger.tail().previous_digest, ledger.entries()[1].digest);
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_append_is_idempotent() {
        let mut ledger = Ledger::create_genesis();
        let entry = Entry::new(1, now_millis(), "tx1", ledger.tail().digest);

        assert!(matches!(ledger.append(entry.clone()), AppendOutcome::Appended(_)));
        assert_eq!(ledger.append(entry), AppendOutcome::Duplicate);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_tampered_payload_invalidates() {
        let mut ledger = ledger_with(&["tx1", "tx2"]);
        ledger.entries[1].payload = b"forged".to_vec();

        assert!(!ledger.is_valid());
    }

    #[test]
    fn test_resealed_tamper_breaks_successor_link() {
        let mut ledger = ledger_with(&["tx1", "tx2"]);
        ledger.entries[1].payload = b"forged".to_vec();
        ledger.entries[1].digest = ledger.entries[1].compute_digest();

        // Entry 1 is self-consistent again but entry 2 still links to the old digest
        assert!(ledger.entries[1].is_sealed());
        assert!(!ledger.is_valid());
    }

    #[test]
    fn test_tampered_genesis_invalidates() {
        let mut ledger = ledger_with(&["tx1"]);
        ledger.entries[0].payload = b"Genesys".to_vec();

        assert!(!ledger.is_valid());
    }

    #[test]
    fn test_from_genesis_adopts_exact_root() {
        let origin = Ledger::create_genesis();
        let adopted = Ledger::from_genesis(origin.genesis().clone()).unwrap();

        assert_eq!(adopted.len(), 1);
        assert_eq!(adopted.genesis().digest, origin.genesis().digest);
    }

    #[test]
    fn test_from_genesis_rejects_non_genesis() {
        let ledger = ledger_with(&["tx1"]);

        assert!(Ledger::from_genesis(ledger.tail().clone()).is_err());

        let mut forged = ledger.genesis().clone();
        forged.created_at += 1;
        assert!(Ledger::from_genesis(forged).is_err());
    }

    #[test]
    fn test_ledger_display() {
        let ledger = ledger_with(&["tx1"]);
        let rendered = ledger.to_string();

        assert_eq!(rendered.lines().count(), 2);
        assert!(rendered.contains("payload: Genesis"));
        assert!(rendered.contains("payload: tx1"));
    }

    proptest! {
        #[test]
        fn prop_built_ledgers_are_valid(payloads in testutil::payloads_strategy(12)) {
            let mut ledger = Ledger::create_genesis();
            for payload in payloads {
                let entry = Entry::new(ledger.len() as u64, now_millis(), payload, ledger.tail().digest);
                ledger.append(entry);
            }
            prop_assert!(ledger.is_valid());
        }

        #[test]
        fn prop_any_payload_tamper_is_detected(
            payloads in testutil::payloads_strategy(8),
            target in any::<prop::sample::Index>(),
        ) {
            let mut ledger = Ledger::create_genesis();
            for payload in payloads {
                let entry = Entry::new(ledger.len() as u64, now_millis(), payload, ledger.tail().digest);
                ledger.append(entry);
            }
            let i = target.index(ledger.len());
            ledger.entries[i].payload.push(0xAA);
            prop_assert!(!ledger.is_valid());
        }
    }
}
