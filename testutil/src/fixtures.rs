/// Network fixtures

use std::net::{SocketAddr, TcpListener};

/// Loopback address on `port`
pub fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// A loopback address whose port was free a moment ago
pub fn free_loopback_addr() -> SocketAddr {
    TcpListener::bind(loopback(0))
        .and_then(|listener| listener.local_addr())
        .expect("bind an ephemeral loopback port")
}
