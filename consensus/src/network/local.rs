// In-process transport
//
// Replicas registered on a `LocalNetwork` exchange bincode-encoded frames over
// unbounded channels. Each delivered frame is decoded and handled on its own
// task, mirroring the one-handler-per-connection shape of the TCP server.

use super::{Message, MessageHandler, NetworkError, NetworkResult, Transport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Mailboxes = Arc<Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<Vec<u8>>>>>;

/// Shared routing table for in-process replicas
#[derive(Clone, Default)]
pub struct LocalNetwork {
    mailboxes: Mailboxes,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that delivers through this network
    pub fn transport(&self) -> Arc<LocalTransport> {
        Arc::new(LocalTransport {
            mailboxes: self.mailboxes.clone(),
        })
    }

    /// Route frames addressed to `addr` into `handler`
    pub fn register<H: MessageHandler>(&self, addr: SocketAddr, handler: Arc<H>) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.lock().insert(addr, tx);

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let handler = handler.clone();
                tokio::spawn(async move {
                    match Message::from_bytes(&frame) {
                        Ok(message) => handler.on_message(message).await,
                        Err(e) => warn!(%addr, error = %e, "Dropping undecodable frame"),
                    }
                });
            }
            debug!(%addr, "Mailbox closed");
        })
    }

    /// Detach `addr`; later sends to it fail as unreachable
    pub fn unregister(&self, addr: &SocketAddr) {
        self.lock().remove(addr);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SocketAddr, mpsc::UnboundedSender<Vec<u8>>>> {
        // A poisoned routing table still holds valid senders
        self.mailboxes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Transport handle bound to a `LocalNetwork`
pub struct LocalTransport {
    mailboxes: Mailboxes,
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, destination: SocketAddr, message: &Message) -> NetworkResult<()> {
        let frame = message.to_bytes()?;
        let sender = self
            .mailboxes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&destination)
            .cloned()
            .ok_or(NetworkError::Unreachable(destination))?;
        sender
            .send(frame)
            .map_err(|_| NetworkError::Unreachable(destination))
    }
}
