//! Local-network discovery over mDNS.
//!
//! Each announcement is handled on its own task: the peer is dialed with
//! bounded retries and, once connected, pushed onto a bounded queue. A full
//! queue drops the peer so the announcement handler never blocks.

use async_trait::async_trait;
use futures::stream;
use libp2p::PeerId;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::retry::{connect_with_retry, ConnectionAttempt, RetryOutcome};
use super::{Lifetime, PeerDiscovery, PeerStream};
use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;
use crate::p2p::transport::{Connector, LocalAnnouncer, PeerFoundHandler, PeerRecord};
use crate::sink::{Observation, SharedSink};

const NAME: &str = "mdns";

pub struct LocalNetworkDiscovery {
    connector: Arc<dyn Connector>,
    announcer: Arc<dyn LocalAnnouncer>,
    config: Arc<DiscoveryConfig>,
    sink: SharedSink,
    queue_tx: mpsc::Sender<PeerRecord>,
    queue_rx: Arc<Mutex<mpsc::Receiver<PeerRecord>>>,
    lifetime: Lifetime,
}

impl LocalNetworkDiscovery {
    pub fn new(
        connector: Arc<dyn Connector>,
        announcer: Arc<dyn LocalAnnouncer>,
        config: Arc<DiscoveryConfig>,
        sink: SharedSink,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.max_peers.max(1));
        Self {
            connector,
            announcer,
            config,
            sink,
            queue_tx,
            queue_rx: Arc::new(Mutex::new(queue_rx)),
            lifetime: Lifetime::default(),
        }
    }

    fn peer_found_handler(&self, token: CancellationToken) -> PeerFoundHandler {
        let notifee = Arc::new(Notifee {
            local_peer_id: self.connector.local_peer_id(),
            connector: self.connector.clone(),
            config: self.config.clone(),
            sink: self.sink.clone(),
            queue_tx: self.queue_tx.clone(),
            tracker: self.lifetime.tracker().clone(),
            token,
        });
        Arc::new(move |peer: PeerRecord| notifee.handle_peer_found(peer))
    }
}

#[async_trait]
impl PeerDiscovery for LocalNetworkDiscovery {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn start(&self, token: &CancellationToken) -> Result<(), DiscoveryError> {
        let token = self.lifetime.begin(token, NAME)?;
        let handler = self.peer_found_handler(token);
        if let Err(source) = self.announcer.register(&self.config.service_tag, handler) {
            self.lifetime.abort();
            return Err(DiscoveryError::StrategyStart {
                strategy: NAME,
                source,
            });
        }
        info!("mDNS discovery service started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), DiscoveryError> {
        self.announcer.unregister();
        self.lifetime.end().await;
        Ok(())
    }

    fn discover_peers(&self, token: CancellationToken) -> Result<PeerStream, DiscoveryError> {
        let lifetime = self.lifetime.current(NAME)?;
        let queue = self.queue_rx.clone();
        let peers = stream::unfold(
            (queue, token, lifetime),
            |(queue, token, lifetime)| async move {
                let next = tokio::select! {
                    _ = token.cancelled() => None,
                    _ = lifetime.cancelled() => None,
                    peer = async { queue.lock().await.recv().await } => peer,
                };
                next.map(|peer| (peer, (queue, token, lifetime)))
            },
        );
        Ok(Box::pin(peers))
    }
}

/// Receives mDNS announcements on behalf of the strategy.
struct Notifee {
    local_peer_id: PeerId,
    connector: Arc<dyn Connector>,
    config: Arc<DiscoveryConfig>,
    sink: SharedSink,
    queue_tx: mpsc::Sender<PeerRecord>,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl Notifee {
    fn handle_peer_found(self: &Arc<Self>, peer: PeerRecord) {
        if peer.id == self.local_peer_id {
            debug!("skipping self connection");
            return;
        }
        if self.token.is_cancelled() {
            return;
        }
        info!("discovered peer {} with address {:?}", peer.id, peer.addrs);
        self.sink.emit(&Observation::PeerDiscovered {
            peer: peer.id,
            source: NAME,
        });

        let notifee = self.clone();
        self.tracker.spawn(async move { notifee.connect_and_enqueue(peer).await });
    }

    async fn connect_and_enqueue(&self, peer: PeerRecord) {
        let attempt = ConnectionAttempt::new(peer.clone(), &self.config);
        match connect_with_retry(
            self.connector.as_ref(),
            attempt,
            self.config.connect_timeout,
            &self.token,
        )
        .await
        {
            RetryOutcome::Connected => {
                self.sink.emit(&Observation::PeerConnected {
                    peer: peer.id,
                    source: NAME,
                });
                self.enqueue(peer);
            }
            RetryOutcome::Abandoned { attempts, error } => {
                error!("failed to connect to peer {} after retries: {error}", peer.id);
                self.sink.emit(&Observation::PeerAbandoned {
                    peer: peer.id,
                    attempts,
                    error: error.to_string(),
                });
            }
            RetryOutcome::Skipped => {
                debug!("connection retries disabled, ignoring peer {}", peer.id)
            }
            RetryOutcome::Cancelled => debug!("context done, stopping discovery"),
        }
    }

    fn enqueue(&self, peer: PeerRecord) {
        match self.queue_tx.try_send(peer) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(peer)) => {
                warn!("peer channel is full, discarding peer {}", peer.id);
                self.sink.emit(&Observation::PeerDropped {
                    peer: peer.id,
                    source: NAME,
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::p2p::transport::DiscoverySource;
    use crate::sink::NullSink;
    use crate::testing::{MemoryHost, MemoryMesh};
    use futures::StreamExt;
    use std::time::Duration;

    fn strategy(host: &Arc<MemoryHost>, config: DiscoveryConfig) -> LocalNetworkDiscovery {
        LocalNetworkDiscovery::new(
            host.clone(),
            host.clone(),
            Arc::new(config),
            Arc::new(NullSink),
        )
    }

    #[tokio::test]
    async fn test_discovers_and_connects_local_peer() {
        let mesh = MemoryMesh::new();
        let host = mesh.host();
        let remote = mesh.host();
        let discovery = strategy(&host, DiscoveryConfig::default());
        let root = CancellationToken::new();

        discovery.start(&root).await.unwrap();
        let mut peers = discovery.discover_peers(root.clone()).unwrap();
        host.announce(remote.record(DiscoverySource::LocalNetwork));

        let found = tokio::time::timeout(Duration::from_secs(5), peers.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, remote.id());
        assert!(host.is_connected(&remote.id()));

        discovery.stop().await.unwrap();
        assert!(peers.next().await.is_none());
    }

    #[tokio::test]
    async fn test_self_announcement_is_filtered() {
        let mesh = MemoryMesh::new();
        let host = mesh.host();
        let discovery = strategy(&host, DiscoveryConfig::default());
        let root = CancellationToken::new();
        discovery.start(&root).await.unwrap();

        host.announce(host.record(DiscoverySource::LocalNetwork));
        discovery.stop().await.unwrap();

        assert!(host.connect_attempts().is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_peers() {
        let mesh = MemoryMesh::new();
        let host = mesh.host();
        let config = DiscoveryConfig::default().with_max_peers(2);
        let discovery = strategy(&host, config);
        let root = CancellationToken::new();
        discovery.start(&root).await.unwrap();

        let remotes: Vec<_> = (0..5).map(|_| mesh.host()).collect();
        for remote in &remotes {
            host.announce(remote.record(DiscoverySource::LocalNetwork));
        }
        // Let every connect task finish without consuming anything.
        discovery.lifetime.tracker().close();
        discovery.lifetime.tracker().wait().await;
        discovery.lifetime.tracker().reopen();

        let mut peers = discovery.discover_peers(root.clone()).unwrap();
        let mut buffered = 0;
        while let Ok(Some(_)) =
            tokio::time::timeout(Duration::from_millis(50), peers.next()).await
        {
            buffered += 1;
        }
        assert_eq!(buffered, 2);
        assert_eq!(host.connect_attempts().len(), 5);
        discovery.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_register_failure_is_start_error() {
        let mesh = MemoryMesh::new();
        let host = mesh.host();
        host.set_announcer_failure(true);
        let discovery = strategy(&host, DiscoveryConfig::default());

        let err = discovery.start(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::StrategyStart {
                strategy: "mdns",
                source: TransportError::Disabled(_)
            }
        ));
        assert!(matches!(
            discovery.discover_peers(CancellationToken::new()),
            Err(DiscoveryError::NotStarted("mdns"))
        ));
    }

    #[tokio::test]
    async fn test_stream_ends_on_consumer_cancel() {
        let mesh = MemoryMesh::new();
        let host = mesh.host();
        let discovery = strategy(&host, DiscoveryConfig::default());
        let root = CancellationToken::new();
        discovery.start(&root).await.unwrap();

        let consumer = CancellationToken::new();
        let mut peers = discovery.discover_peers(consumer.clone()).unwrap();
        consumer.cancel();
        assert!(peers.next().await.is_none());
        discovery.stop().await.unwrap();
    }
}
