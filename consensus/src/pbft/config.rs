// Replica configuration

use crate::membership::PeerId;
use crate::votes::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown consensus mode: {0}")]
    UnknownMode(String),
}

/// Number of voting rounds before an entry is appended
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsensusMode {
    /// PREPARE then COMMIT; a commit quorum appends
    TwoPhase,
    /// PREPARE, COMMIT, then REPLY; a reply quorum appends
    #[default]
    ThreePhase,
}

impl FromStr for ConsensusMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "two-phase" | "2" => Ok(ConsensusMode::TwoPhase),
            "three-phase" | "3" => Ok(ConsensusMode::ThreePhase),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for ConsensusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusMode::TwoPhase => f.write_str("two-phase"),
            ConsensusMode::ThreePhase => f.write_str("three-phase"),
        }
    }
}

/// Replica configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    /// Local peer identity
    pub id: PeerId,

    /// Address other peers reach this replica at
    pub listen_addr: SocketAddr,

    pub mode: ConsensusMode,

    /// Base timeout before a stalled proposal triggers a view-change vote.
    /// `None` disables timeout-driven view changes.
    pub view_change_timeout_ms: Option<u64>,

    /// Cap for the backed-off proposal timeout
    pub max_view_change_timeout_ms: u64,

    /// How long vote records are kept behind the ledger tail
    pub vote_retention: RetentionPolicy,

    /// Outbound connect timeout for the TCP transport
    pub connect_timeout_ms: u64,

    /// Start with corrupted votes
    pub byzantine: bool,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            id: PeerId(0),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            mode: ConsensusMode::default(),
            view_change_timeout_ms: Some(10_000),
            max_view_change_timeout_ms: 60_000,
            vote_retention: RetentionPolicy::default(),
            connect_timeout_ms: 3_000,
            byzantine: false,
        }
    }
}

impl ReplicaConfig {
    pub fn new(id: PeerId, listen_addr: SocketAddr) -> Self {
        Self {
            id,
            listen_addr,
            ..Default::default()
        }
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn with_mode(mut self, mode: ConsensusMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_view_change_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.view_change_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.vote_retention = retention;
        self
    }

    pub fn with_byzantine(mut self, byzantine: bool) -> Self {
        self.byzantine = byzantine;
        self
    }

    pub fn view_change_timeout(&self) -> Option<Duration> {
        self.view_change_timeout_ms.map(Duration::from_millis)
    }

    pub fn max_view_change_timeout(&self) -> Duration {
        Duration::from_millis(self.max_view_change_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
