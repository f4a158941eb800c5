// PBFT replica
//
// Drives each proposal through PROPOSE -> PREPARE -> COMMIT (-> REPLY) and
// appends it to the ledger once the final phase holds a quorum. Also owns
// the membership handshake, genesis synchronization and view changes.

pub mod config;


pub use config::{ConfigError, ConsensusMode, ReplicaConfig};

use crate::crypto::Digest;
use crate::fault::{CorruptDigest, Honest, VoteStrategy};
use crate::ledger::{now_millis, AppendOutcome, Entry, Ledger, LedgerError};
use crate::membership::{primary_for, MembershipDirectory, PeerId};
use crate::network::{Message, MessageHandler, NetworkError, Transport};
use crate::pacemaker::{Pacemaker, ViewChangeTracker};
use crate::votes::{is_quorum, Phase, VoteAccounting};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Replica errors
#[derive(Error, Debug)]
pub enum ReplicaError {
    #[error("Not primary; current primary is peer {primary}")]
    NotPrimary { primary: PeerId },

    #[error("Ledger not initialized")]
    Uninitialized,

    #[error("Proposal for index {sequence_index} is still pending")]
    ProposalPending { sequence_index: u64 },

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, ReplicaError>;

/// What a freshly certified phase leads to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Cast(Phase),
    Append,
}

/// One peer's consensus state machine
pub struct Replica {
    me: Weak<Replica>,
    config: ReplicaConfig,
    transport: Arc<dyn Transport>,

    /// Single exclusive lock around the chain; `None` until a genesis is
    /// created or received
    ledger: Mutex<Option<Ledger>>,
    /// Index and digest of our own proposal awaiting append. Locked after
    /// `ledger` when both are held.
    pending: Mutex<Option<(u64, Digest)>>,
    membership: RwLock<MembershipDirectory>,
    votes: VoteAccounting,
    view_changes: Mutex<ViewChangeTracker>,
    pacemaker: Mutex<Pacemaker>,
    strategy: RwLock<Arc<dyn VoteStrategy>>,
}

impl Replica {
    /// Create a replica. The peer that is primary of a network containing
    /// only itself originates the genesis entry; every other peer starts
    /// without a ledger and synchronizes its root on connect.
    pub fn new(config: ReplicaConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let membership = MembershipDirectory::new(config.id, config.listen_addr);
        let ledger = (config.id == primary_for(0, 1)).then(Ledger::create_genesis);
        let strategy: Arc<dyn VoteStrategy> = if config.byzantine {
            Arc::new(CorruptDigest)
        } else {
            Arc::new(Honest)
        };
        let base_timeout = config.view_change_timeout().unwrap_or_default();
        let pacemaker = Pacemaker::new(base_timeout, config.max_view_change_timeout());

        info!(
            peer = %config.id,
            addr = %config.listen_addr,
            mode = %config.mode,
            has_ledger = ledger.is_some(),
            "Replica created"
        );

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            votes: VoteAccounting::new(config.vote_retention),
            config,
            transport,
            ledger: Mutex::new(ledger),
            pending: Mutex::new(None),
            membership: RwLock::new(membership),
            view_changes: Mutex::new(ViewChangeTracker::new()),
            pacemaker: Mutex::new(pacemaker),
            strategy: RwLock::new(strategy),
        })
    }

    pub fn id(&self) -> PeerId {
        self.config.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.config.listen_addr
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub async fn view(&self) -> u64 {
        self.membership.read().await.view()
    }

    pub async fn primary(&self) -> PeerId {
        self.membership.read().await.primary()
    }

    pub async fn is_primary(&self) -> bool {
        self.membership.read().await.is_primary()
    }

    /// Network size as seen locally
    pub async fn n(&self) -> usize {
        self.membership.read().await.n()
    }

    pub async fn peers(&self) -> Vec<(PeerId, SocketAddr)> {
        self.membership.read().await.peers()
    }

    /// Snapshot of the ledger, if one has been initialized
    pub async fn ledger(&self) -> Option<Ledger> {
        self.ledger.lock().await.clone()
    }

    pub async fn ledger_len(&self) -> usize {
        self.ledger.lock().await.as_ref().map_or(0, Ledger::len)
    }

    pub fn votes(&self) -> &VoteAccounting {
        &self.votes
    }

    /// Install a vote strategy
    pub async fn set_vote_strategy(&self, strategy: Arc<dyn VoteStrategy>) {
        *self.strategy.write().await = strategy;
    }

    /// Toggle fault injection
    pub async fn set_byzantine(&self, byzantine: bool) {
        let strategy: Arc<dyn VoteStrategy> = if byzantine {
            Arc::new(CorruptDigest)
        } else {
            Arc::new(Honest)
        };
        self.set_vote_strategy(strategy).await;
        if byzantine {
            warn!(peer = %self.id(), "Fault injection enabled; votes will carry a corrupted digest");
        } else {
            info!(peer = %self.id(), "Fault injection disabled");
        }
    }

    pub async fn is_byzantine(&self) -> bool {
        self.strategy.read().await.is_byzantine()
    }

    // ===== Membership =====

    /// Join `peer_id` at `addr`. The peer is registered only if the first
    /// contact can be delivered; the roots are then synchronized.
    pub async fn connect_peer(&self, peer_id: PeerId, addr: SocketAddr) -> Result<()> {
        if peer_id == self.id() || self.membership.read().await.contains(&peer_id) {
            info!(peer = %peer_id, "Peer already connected");
            return Ok(());
        }

        let hello = Message::Connect {
            peer_id: self.id(),
            addr: self.addr(),
        };
        self.transport.send(addr, &hello).await?;
        self.membership.write().await.add_peer(peer_id, addr);
        info!(peer = %peer_id, %addr, "Connected to peer");

        self.synchronize_genesis(peer_id, addr).await;
        Ok(())
    }

    async fn synchronize_genesis(&self, peer_id: PeerId, addr: SocketAddr) {
        let genesis = self
            .ledger
            .lock()
            .await
            .as_ref()
            .map(|ledger| ledger.genesis().clone());

        let message = match genesis {
            Some(genesis) => Message::SendGenesis { genesis },
            None => Message::RequestGenesis {
                peer_id: self.id(),
                addr: self.addr(),
            },
        };
        if let Err(e) = self.transport.send(addr, &message).await {
            warn!(peer = %peer_id, error = %e, "Failed to synchronize genesis");
        }
    }

    async fn handle_connect(&self, peer_id: PeerId, addr: SocketAddr, answer: bool) {
        let added = self.membership.write().await.add_peer(peer_id, addr);
        if !added || !answer {
            return;
        }

        let back = Message::ConnectBack {
            peer_id: self.id(),
            addr: self.addr(),
        };
        if let Err(e) = self.transport.send(addr, &back).await {
            warn!(peer = %peer_id, error = %e, "Failed to connect back");
        }
    }

    async fn handle_request_genesis(&self, peer_id: PeerId, addr: SocketAddr) {
        let genesis = self
            .ledger
            .lock()
            .await
            .as_ref()
            .map(|ledger| ledger.genesis().clone());

        let Some(genesis) = genesis else {
            debug!(peer = %peer_id, "Genesis requested but no chain to offer");
            return;
        };
        match self.transport.send(addr, &Message::SendGenesis { genesis }).await {
            Ok(()) => info!(peer = %peer_id, "Sent genesis entry"),
            Err(e) => warn!(peer = %peer_id, error = %e, "Failed to send genesis entry"),
        }
    }

    async fn handle_send_genesis(&self, genesis: Entry) -> Result<()> {
        let mut ledger = self.ledger.lock().await;
        if ledger.is_some() {
            debug!(digest = %genesis.digest, "Ignoring genesis offer; chain already initialized");
            return Ok(());
        }
        let adopted = Ledger::from_genesis(genesis)?;
        info!(digest = %adopted.genesis().digest, "Genesis received; ledger initialized");
        *ledger = Some(adopted);
        Ok(())
    }

    // ===== Consensus =====

    /// Originate a proposal for `payload`. Only the primary may propose.
    pub async fn propose_block(&self, payload: impl Into<Vec<u8>>) -> Result<Entry> {
        let primary = {
            let membership = self.membership.read().await;
            if !membership.is_primary() {
                Some(membership.primary())
            } else {
                None
            }
        };
        if let Some(primary) = primary {
            warn!(peer = %self.id(), %primary, "Rejecting proposal: not the primary");
            return Err(ReplicaError::NotPrimary { primary });
        }

        // One proposal in flight at a time, so indices and links stay dense
        let entry = {
            let ledger = self.ledger.lock().await;
            let ledger = ledger.as_ref().ok_or(ReplicaError::Uninitialized)?;
            let mut pending = self.pending.lock().await;
            if let Some((sequence_index, _)) = *pending {
                debug!(sequence_index, "Rejecting proposal: previous one still pending");
                return Err(ReplicaError::ProposalPending { sequence_index });
            }
            let entry = Entry::new(ledger.len() as u64, now_millis(), payload, ledger.tail().digest);
            *pending = Some((entry.sequence_index, entry.digest));
            entry
        };

        info!(index = entry.sequence_index, digest = %entry.digest, "Proposing entry");
        self.broadcast(Message::Propose {
            entry: entry.clone(),
            proposer: self.id(),
        })
        .await;
        self.handle_propose(entry.clone(), self.id()).await;
        Ok(entry)
    }

    async fn handle_propose(&self, entry: Entry, proposer: PeerId) {
        if !entry.is_sealed() {
            warn!(%proposer, index = entry.sequence_index, "Ignoring proposal with mismatched digest");
            return;
        }
        if self.votes.is_stale(entry.sequence_index).await {
            debug!(index = entry.sequence_index, "Ignoring proposal below retention watermark");
            return;
        }

        let (view, primary) = {
            let membership = self.membership.read().await;
            (membership.view(), membership.primary())
        };
        if proposer != primary {
            // Membership may not have converged yet
            debug!(%proposer, %primary, "Proposal from a peer not locally known as primary");
        }

        info!(index = entry.sequence_index, digest = %entry.digest, "Propose phase started");
        self.votes.open(entry.digest, entry.sequence_index).await;
        self.arm_proposal_timer(entry.digest, entry.sequence_index, view);
        self.cast_vote(Phase::Prepare, entry).await;
    }

    /// Broadcast our vote for `phase` and count it locally, following any
    /// quorum it completes.
    async fn cast_vote(&self, phase: Phase, entry: Entry) {
        let mut next = Some(phase);
        while let Some(phase) = next.take() {
            let digest = match phase {
                Phase::Prepare | Phase::Commit => self.strategy.read().await.vote_digest(entry.digest),
                Phase::Reply => entry.digest,
            };
            if digest != entry.digest {
                warn!(%phase, index = entry.sequence_index, "Sending corrupted vote");
            }

            self.broadcast(Message::vote(phase, entry.clone(), digest, self.id()))
                .await;
            debug!(%phase, index = entry.sequence_index, "Broadcast vote");

            match self.tally(phase, &entry, digest, self.id()).await {
                Some(Step::Cast(following)) => next = Some(following),
                Some(Step::Append) => self.commit_entry(&entry).await,
                None => {}
            }
        }
    }

    async fn handle_vote(&self, phase: Phase, entry: Entry, digest: Digest, voter: PeerId) {
        if !entry.is_sealed() {
            warn!(%phase, %voter, "Ignoring vote carrying a malformed entry");
            return;
        }
        if self.votes.is_stale(entry.sequence_index).await {
            debug!(%phase, %voter, index = entry.sequence_index, "Ignoring stale vote");
            return;
        }

        match self.tally(phase, &entry, digest, voter).await {
            Some(Step::Cast(following)) => self.cast_vote(following, entry).await,
            Some(Step::Append) => self.commit_entry(&entry).await,
            None => {}
        }
    }

    /// Record a vote and report what a newly reached quorum leads to
    async fn tally(&self, phase: Phase, entry: &Entry, digest: Digest, voter: PeerId) -> Option<Step> {
        let n = self.n().await;
        let count = self
            .votes
            .record_vote(digest, entry.sequence_index, phase, voter)
            .await;
        debug!(%phase, %voter, %digest, count, n, "Vote recorded");

        if !self.votes.certify(&digest, phase, n).await {
            return None;
        }
        if digest != entry.digest {
            warn!(%phase, %digest, "Quorum reached for a digest that does not match its entry");
            return None;
        }
        info!(%phase, %digest, count, "Quorum reached");

        Some(match (phase, self.config.mode) {
            (Phase::Prepare, _) => Step::Cast(Phase::Commit),
            (Phase::Commit, ConsensusMode::ThreePhase) => Step::Cast(Phase::Reply),
            (Phase::Commit, ConsensusMode::TwoPhase) | (Phase::Reply, _) => Step::Append,
        })
    }

    async fn commit_entry(&self, entry: &Entry) {
        let mut ledger = self.ledger.lock().await;
        let Some(chain) = ledger.as_mut() else {
            warn!(index = entry.sequence_index, "Quorum reached but ledger is not initialized");
            return;
        };

        let outcome = chain.append(entry.clone());
        let tail_index = chain.tail().sequence_index;
        {
            let mut pending = self.pending.lock().await;
            if pending.is_some_and(|(_, digest)| digest == entry.digest) {
                *pending = None;
            }
        }
        drop(ledger);
        self.votes.mark_appended(&entry.digest).await;

        match outcome {
            AppendOutcome::Appended(digest) => {
                info!(
                    index = tail_index,
                    %digest,
                    payload = %String::from_utf8_lossy(&entry.payload),
                    "Entry appended to ledger"
                );
                self.pacemaker.lock().await.reset();
                self.votes.prune(tail_index).await;
            }
            AppendOutcome::Duplicate => {
                debug!(digest = %entry.digest, "Entry already appended");
            }
        }
    }

    // ===== View change =====

    fn arm_proposal_timer(&self, digest: Digest, sequence_index: u64, view: u64) {
        if self.config.view_change_timeout().is_none() {
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };

        tokio::spawn(async move {
            let timeout = me.pacemaker.lock().await.next_timeout();
            tokio::time::sleep(timeout).await;
            me.on_proposal_timeout(digest, sequence_index, view).await;
        });
    }

    /// The ledger may hold the entry under a relinked digest, so the vote
    /// record's marker and the pruning watermark also count as settled.
    async fn on_proposal_timeout(&self, digest: Digest, sequence_index: u64, view: u64) {
        let in_ledger = self
            .ledger
            .lock()
            .await
            .as_ref()
            .is_some_and(|ledger| ledger.contains(&digest));
        if in_ledger
            || self.votes.is_appended(&digest).await
            || self.votes.is_stale(sequence_index).await
            || self.view().await != view
        {
            return;
        }

        self.pacemaker.lock().await.record_timeout();
        warn!(%digest, view, "Proposal stalled; requesting view change");
        self.request_view_change().await;
    }

    /// Vote to move to the next view. Returns the requested view.
    pub async fn request_view_change(&self) -> u64 {
        let target = self.view().await + 1;
        self.broadcast(Message::ViewChange {
            new_view: target,
            voter: self.id(),
        })
        .await;
        self.handle_view_change(target, self.id()).await;
        target
    }

    async fn handle_view_change(&self, new_view: u64, voter: PeerId) {
        let mut membership = self.membership.write().await;
        if new_view <= membership.view() {
            debug!(new_view, %voter, "Ignoring stale view change");
            return;
        }

        let n = membership.n();
        let count = self.view_changes.lock().await.record(new_view, voter);
        info!(new_view, %voter, count, "View change requested");

        if is_quorum(count, n) {
            membership.advance_view(new_view);
            self.view_changes.lock().await.clear_through(new_view);
            // A stalled proposal from the old view never completes
            self.pending.lock().await.take();
            info!(view = new_view, primary = %membership.primary(), "View changed");
        }
    }

    // ===== Transport =====

    /// Send to every known peer; failures are logged and skipped
    async fn broadcast(&self, message: Message) {
        let peers = self.membership.read().await.peers();
        for (peer, addr) in peers {
            if let Err(e) = self.transport.send(addr, &message).await {
                warn!(
                    %peer,
                    %addr,
                    kind = message.message_type(),
                    error = %e,
                    "Failed to deliver message"
                );
            }
        }
    }

    async fn handle_message(&self, message: Message) -> Result<()> {
        match message {
            Message::Connect { peer_id, addr } => self.handle_connect(peer_id, addr, true).await,
            Message::ConnectBack { peer_id, addr } => self.handle_connect(peer_id, addr, false).await,
            Message::RequestGenesis { peer_id, addr } => self.handle_request_genesis(peer_id, addr).await,
            Message::SendGenesis { genesis } => self.handle_send_genesis(genesis).await?,
            Message::Propose { entry, proposer } => self.handle_propose(entry, proposer).await,
            Message::Prepare { entry, digest, voter } => {
                self.handle_vote(Phase::Prepare, entry, digest, voter).await
            }
            Message::Commit { entry, digest, voter } => {
                self.handle_vote(Phase::Commit, entry, digest, voter).await
            }
            Message::Reply { entry, digest, voter } => {
                self.handle_vote(Phase::Reply, entry, digest, voter).await
            }
            Message::ViewChange { new_view, voter } => self.handle_view_change(new_view, voter).await,
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for Replica {
    async fn on_message(&self, message: Message) {
        let kind = message.message_type();
        if let Err(e) = self.handle_message(message).await {
            warn!(peer = %self.id(), kind, error = %e, "Failed to handle message");
        }
    }
}
