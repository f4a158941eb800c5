// TCP transport
//
// Each send opens a connection, writes one length-prefixed frame and closes.
// The server accepts connections until its shutdown signal flips and spawns
// one handler task per connection.

use super::{Message, MessageHandler, NetworkError, NetworkResult, Transport};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Largest frame accepted from the wire
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Write a message as a 4-byte big-endian length followed by its bincode body
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> NetworkResult<()>
where
    W: AsyncWrite + Unpin,
{
    let body = message.to_bytes()?;
    if body.len() > MAX_FRAME_LEN {
        return Err(NetworkError::FrameTooLarge(body.len()));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> NetworkResult<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(NetworkError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(Message::from_bytes(&body)?))
}

/// Connection-per-message TCP transport
#[derive(Clone, Debug)]
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, destination: SocketAddr, message: &Message) -> NetworkResult<()> {
        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(destination))
            .await
            .map_err(|_| NetworkError::ConnectionTimeout(destination))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::ConnectionRefused => NetworkError::Unreachable(destination),
                _ => NetworkError::Io(e),
            })?;

        write_frame(&mut stream, message).await?;
        stream.shutdown().await?;
        debug!(to = %destination, kind = message.message_type(), "Sent message");
        Ok(())
    }
}

/// Accept loop feeding inbound frames to a handler
pub struct TcpServer {
    listener: TcpListener,
}

impl TcpServer {
    /// Bind the listen address
    pub async fn bind(addr: SocketAddr) -> NetworkResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> NetworkResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` turns true or its sender drops
    pub async fn run<H: MessageHandler>(self, handler: Arc<H>, mut shutdown: watch::Receiver<bool>) {
        let addr = self.listener.local_addr().ok();
        info!(?addr, "Listening for peers");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        debug!(%remote, "Connection accepted");
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, handler).await {
                                warn!(%remote, error = %e, "Dropping connection");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(?addr, "Listener stopped");
    }
}

async fn serve_connection<H: MessageHandler>(mut stream: TcpStream, handler: Arc<H>) -> NetworkResult<()> {
    while let Some(message) = read_frame(&mut stream).await? {
        handler.on_message(message).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use crate::membership::PeerId;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let message = Message::SendGenesis {
            genesis: Ledger::create_genesis().genesis().clone(),
        };
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &message).await.unwrap();

        let mut reader = buffer.as_slice();
        assert_eq!(read_frame(&mut reader).await.unwrap(), Some(message));
        assert_eq!(read_frame(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());

        let mut reader = buffer.as_slice();
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(NetworkError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_send_to_closed_port_fails() {
        let addr = testutil::free_loopback_addr();
        let transport = TcpTransport::new(Duration::from_millis(500));
        let message = Message::ViewChange { new_view: 1, voter: PeerId(0) };

        assert!(transport.send(addr, &message).await.is_err());
    }
}
