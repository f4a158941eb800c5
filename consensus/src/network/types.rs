// Network message definitions

use crate::crypto::Digest;
use crate::ledger::Entry;
use crate::membership::PeerId;
use crate::votes::Phase;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Messages exchanged between replicas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// First contact from a peer that wants to join the directory
    Connect {
        peer_id: PeerId,
        addr: SocketAddr,
    },

    /// Answer to a first contact, registering the receiver in return
    ConnectBack {
        peer_id: PeerId,
        addr: SocketAddr,
    },

    /// Ask for the chain root; answered at `addr`
    RequestGenesis {
        peer_id: PeerId,
        addr: SocketAddr,
    },

    /// Offer of the chain root
    SendGenesis {
        genesis: Entry,
    },

    /// New entry from the primary
    Propose {
        entry: Entry,
        proposer: PeerId,
    },

    /// Vote for `digest` in the prepare phase
    Prepare {
        entry: Entry,
        digest: Digest,
        voter: PeerId,
    },

    /// Vote for `digest` in the commit phase
    Commit {
        entry: Entry,
        digest: Digest,
        voter: PeerId,
    },

    /// Vote for `digest` in the reply phase
    Reply {
        entry: Entry,
        digest: Digest,
        voter: PeerId,
    },

    /// Vote to move to `new_view`
    ViewChange {
        new_view: u64,
        voter: PeerId,
    },
}

impl Message {
    /// Build the vote message for a phase
    pub fn vote(phase: Phase, entry: Entry, digest: Digest, voter: PeerId) -> Self {
        match phase {
            Phase::Prepare => Message::Prepare { entry, digest, voter },
            Phase::Commit => Message::Commit { entry, digest, voter },
            Phase::Reply => Message::Reply { entry, digest, voter },
        }
    }

    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Get message type as string (for logging)
    pub fn message_type(&self) -> &'static str {
        match self {
            Message::Connect { .. } => "connect",
            Message::ConnectBack { .. } => "connect_back",
            Message::RequestGenesis { .. } => "request_genesis",
            Message::SendGenesis { .. } => "send_genesis",
            Message::Propose { .. } => "propose",
            Message::Prepare { .. } => "prepare",
            Message::Commit { .. } => "commit",
            Message::Reply { .. } => "reply",
            Message::ViewChange { .. } => "view_change",
        }
    }
}
