// Transport layer
//
// The replica depends only on "send this message to that address" and on an
// inbound callback. This module provides:
// - the `Transport` and `MessageHandler` seams
// - a TCP transport and accept loop (one connection per message)
// - an in-process transport with the same codec, used by tests

use async_trait::async_trait;
use std::net::SocketAddr;

pub mod local;
pub mod tcp;
pub mod types;

#[cfg(test)]
mod integration_tests;

pub use local::{LocalNetwork, LocalTransport};
pub use tcp::{TcpServer, TcpTransport, MAX_FRAME_LEN};
pub use types::Message;

/// Network error types
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Peer unreachable at {0}")]
    Unreachable(SocketAddr),
    #[error("Connection to {0} timed out")]
    ConnectionTimeout(SocketAddr),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("Frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
}

/// Result type for network operations
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Point-to-point delivery of a message to a peer's address.
///
/// Sends are fire-and-forget: `Ok` means the message left this process, not
/// that the peer processed it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, destination: SocketAddr, message: &Message) -> NetworkResult<()>;
}

/// Inbound dispatch for messages arriving on any transport
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_message(&self, message: Message);
}
