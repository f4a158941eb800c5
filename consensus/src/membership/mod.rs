// Membership directory
//
// Maps peer identity to network address and derives the primary from the
// current view: primary = view mod n, where n counts the local peer too.
// Membership converges asynchronously, so two peers may transiently disagree
// on n and therefore on the primary. That gap is accepted, not corrected.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use tracing::info;

/// Peer identity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PeerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Primary selection: round-robin over the view number
pub fn primary_for(view: u64, n: usize) -> PeerId {
    PeerId(view % n.max(1) as u64)
}

/// Directory of known peers plus the local view of who is primary
#[derive(Clone, Debug)]
pub struct MembershipDirectory {
    local_id: PeerId,
    local_addr: SocketAddr,
    peers: HashMap<PeerId, SocketAddr>,
    view: u64,
    primary: PeerId,
}

impl MembershipDirectory {
    /// Create a directory containing only the local peer
    pub fn new(local_id: PeerId, local_addr: SocketAddr) -> Self {
        Self {
            local_id,
            local_addr,
            peers: HashMap::new(),
            view: 0,
            primary: primary_for(0, 1),
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Register a peer. Returns false if it was already known.
    pub fn add_peer(&mut self, id: PeerId, addr: SocketAddr) -> bool {
        if id == self.local_id || self.peers.contains_key(&id) {
            return false;
        }
        self.peers.insert(id, addr);
        self.update_primary();
        info!(
            peer = %id,
            %addr,
            n = self.n(),
            primary = %self.primary,
            "Peer added to directory"
        );
        true
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn address_of(&self, id: &PeerId) -> Option<SocketAddr> {
        self.peers.get(id).copied()
    }

    /// Snapshot of every remote peer, ordered by identity
    pub fn peers(&self) -> Vec<(PeerId, SocketAddr)> {
        let mut peers: Vec<_> = self.peers.iter().map(|(id, addr)| (*id, *addr)).collect();
        peers.sort_by_key(|(id, _)| *id);
        peers
    }

    /// Network size including the local peer
    pub fn n(&self) -> usize {
        self.peers.len() + 1
    }

    pub fn view(&self) -> u64 {
        self.view
    }

    pub fn primary(&self) -> PeerId {
        self.primary
    }

    pub fn is_primary(&self) -> bool {
        self.primary == self.local_id
    }

    /// Move to a later view. Returns false for a view that is not ahead.
    pub fn advance_view(&mut self, new_view: u64) -> bool {
        if new_view <= self.view {
            return false;
        }
        self.view = new_view;
        self.update_primary();
        true
    }

    fn update_primary(&mut self) {
        self.primary = primary_for(self.view, self.n());
    }
}
