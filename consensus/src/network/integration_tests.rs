/// TCP network integration tests
///
/// These tests run real listeners on loopback ports:
/// - Frame delivery from transport to handler
/// - Listener shutdown
/// - A replica cluster agreeing over TCP

#[cfg(test)]
mod tests {
    use crate::membership::PeerId;
    use crate::network::{Message, MessageHandler, TcpServer, TcpTransport, Transport};
    use crate::pbft::{Replica, ReplicaConfig};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::sync::{watch, Mutex};
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout, Duration, Instant};

    #[derive(Default)]
    struct Recorder {
        received: Mutex<Vec<Message>>,
    }

    #[async_trait::async_trait]
    impl MessageHandler for Recorder {
        async fn on_message(&self, message: Message) {
            self.received.lock().await.push(message);
        }
    }

    async fn start_server<H: MessageHandler>(
        addr: SocketAddr,
        handler: Arc<H>,
    ) -> (SocketAddr, watch::Sender<bool>, JoinHandle<()>) {
        let server = TcpServer::bind(addr).await.unwrap();
        let bound = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(server.run(handler, shutdown_rx));
        (bound, shutdown_tx, handle)
    }

    #[tokio::test]
    async fn test_tcp_delivers_messages_in_send_order() {
        let recorder = Arc::new(Recorder::default());
        let (addr, _shutdown, _server) = start_server(testutil::loopback(0), recorder.clone()).await;
        let transport = TcpTransport::default();

        let first = Message::Connect { peer_id: PeerId(1), addr: testutil::loopback(6001) };
        let second = Message::ViewChange { new_view: 2, voter: PeerId(1) };
        transport.send(addr, &first).await.unwrap();
        // Each send is its own connection; wait so ordering is observable
        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.received.lock().await.is_empty() {
            assert!(Instant::now() < deadline, "first message never arrived");
            sleep(Duration::from_millis(10)).await;
        }
        transport.send(addr, &second).await.unwrap();

        while recorder.received.lock().await.len() < 2 {
            assert!(Instant::now() < deadline, "second message never arrived");
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recorder.received.lock().await.as_slice(), &[first, second]);
    }

    #[tokio::test]
    async fn test_server_stops_on_shutdown() {
        let recorder = Arc::new(Recorder::default());
        let (addr, shutdown, server) = start_server(testutil::loopback(0), recorder).await;

        shutdown.send(true).unwrap();
        timeout(Duration::from_secs(2), server)
            .await
            .expect("listener did not stop")
            .unwrap();

        let message = Message::ViewChange { new_view: 1, voter: PeerId(0) };
        assert!(TcpTransport::new(Duration::from_millis(500))
            .send(addr, &message)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_server_stops_when_signal_dropped() {
        let recorder = Arc::new(Recorder::default());
        let (_addr, shutdown, server) = start_server(testutil::loopback(0), recorder).await;

        drop(shutdown);
        timeout(Duration::from_secs(2), server)
            .await
            .expect("listener did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_replicas_agree_over_tcp() {
        let mut replicas = Vec::new();
        let mut shutdowns = Vec::new();
        for id in 0..4 {
            let addr = testutil::free_loopback_addr();
            let config = ReplicaConfig::new(PeerId(id), addr).with_view_change_timeout(None);
            let transport = Arc::new(TcpTransport::new(config.connect_timeout()));
            let replica = Replica::new(config, transport);
            let (_, shutdown, _) = start_server(addr, replica.clone()).await;
            replicas.push(replica);
            shutdowns.push(shutdown);
        }

        for (j, joiner) in replicas.iter().enumerate() {
            for earlier in &replicas[..j] {
                joiner.connect_peer(earlier.id(), earlier.addr()).await.unwrap();
            }
        }

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let mut ready = true;
            for replica in &replicas {
                ready &= replica.n().await == 4 && replica.ledger_len().await == 1;
            }
            if ready {
                break;
            }
            assert!(Instant::now() < deadline, "cluster never formed");
            sleep(Duration::from_millis(20)).await;
        }

        let entry = replicas[0].propose_block("over the wire").await.unwrap();

        loop {
            let mut done = true;
            for replica in &replicas {
                done &= replica
                    .ledger()
                    .await
                    .is_some_and(|l| l.len() == 2 && l.tail().digest == entry.digest);
            }
            if done {
                break;
            }
            assert!(Instant::now() < deadline, "entry never appended everywhere");
            sleep(Duration::from_millis(20)).await;
        }

        for shutdown in shutdowns {
            let _ = shutdown.send(true);
        }
    }
}
