//! Discovery through the Kademlia routing overlay.
//!
//! The node advertises itself as a provider of the service tag and polls the
//! overlay for other providers on a fixed interval.

use async_trait::async_trait;
use libp2p::PeerId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Lifetime, PeerDiscovery, PeerStream};
use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;
use crate::p2p::transport::{PeerRecord, RoutingOverlay};
use crate::sink::{Observation, SharedSink};

const NAME: &str = "dht";

pub struct RoutedNetworkDiscovery {
    overlay: Arc<dyn RoutingOverlay>,
    local_peer_id: PeerId,
    config: Arc<DiscoveryConfig>,
    sink: SharedSink,
    lifetime: Lifetime,
}

impl RoutedNetworkDiscovery {
    pub fn new(
        overlay: Arc<dyn RoutingOverlay>,
        local_peer_id: PeerId,
        config: Arc<DiscoveryConfig>,
        sink: SharedSink,
    ) -> Self {
        Self {
            overlay,
            local_peer_id,
            config,
            sink,
            lifetime: Lifetime::default(),
        }
    }

    fn start_error(&self, source: crate::error::TransportError) -> DiscoveryError {
        self.lifetime.abort();
        DiscoveryError::StrategyStart {
            strategy: NAME,
            source,
        }
    }
}

#[async_trait]
impl PeerDiscovery for RoutedNetworkDiscovery {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn start(&self, token: &CancellationToken) -> Result<(), DiscoveryError> {
        let token = self.lifetime.begin(token, NAME)?;

        self.overlay
            .bootstrap()
            .await
            .map_err(|e| self.start_error(e))?;
        self.overlay
            .advertise(&self.config.service_tag)
            .await
            .map_err(|e| self.start_error(e))?;

        let overlay = self.overlay.clone();
        let tag = self.config.service_tag.clone();
        let interval = self.config.readvertise_interval;
        self.lifetime.tracker().spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = overlay.advertise(&tag).await {
                    warn!("failed to refresh DHT advertisement: {e}");
                }
            }
        });

        info!("DHT discovery service started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), DiscoveryError> {
        self.lifetime.end().await;
        Ok(())
    }

    fn discover_peers(&self, token: CancellationToken) -> Result<PeerStream, DiscoveryError> {
        let lifetime = self.lifetime.current(NAME)?;
        let (tx, rx) = mpsc::channel(self.config.max_peers.max(1));
        let poller = Poller {
            overlay: self.overlay.clone(),
            local_peer_id: self.local_peer_id,
            config: self.config.clone(),
            sink: self.sink.clone(),
            tx,
            token,
            lifetime,
        };
        self.lifetime.tracker().spawn(poller.run());
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

struct Poller {
    overlay: Arc<dyn RoutingOverlay>,
    local_peer_id: PeerId,
    config: Arc<DiscoveryConfig>,
    sink: SharedSink,
    tx: mpsc::Sender<PeerRecord>,
    token: CancellationToken,
    lifetime: CancellationToken,
}

impl Poller {
    async fn run(self) {
        loop {
            let found = tokio::select! {
                _ = self.token.cancelled() => return,
                _ = self.lifetime.cancelled() => return,
                found = self.overlay.find_peers(&self.config.service_tag) => found,
            };

            match found {
                Ok(peers) => {
                    for peer in peers {
                        if peer.id == self.local_peer_id {
                            continue;
                        }
                        let id = peer.id;
                        tokio::select! {
                            sent = self.tx.send(peer) => {
                                if sent.is_err() {
                                    return;
                                }
                                debug!("DHT: discovered peer: {id}");
                                self.sink.emit(&Observation::PeerDiscovered { peer: id, source: NAME });
                            }
                            _ = self.token.cancelled() => return,
                            _ = self.lifetime.cancelled() => return,
                        }
                    }
                }
                Err(e) => error!("failed to find peers: {e}"),
            }

            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = self.lifetime.cancelled() => return,
                _ = tokio::time::sleep(self.config.retry_timeout) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::sink::NullSink;
    use crate::testing::MemoryMesh;
    use futures::StreamExt;
    use std::time::Duration;

    fn strategy(host: &Arc<crate::testing::MemoryHost>) -> RoutedNetworkDiscovery {
        RoutedNetworkDiscovery::new(
            host.clone(),
            host.id(),
            Arc::new(DiscoveryConfig::default()),
            Arc::new(NullSink),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_finds_other_providers_but_not_self() {
        let mesh = MemoryMesh::new();
        let host = mesh.host();
        let remote = mesh.host();
        let root = CancellationToken::new();

        let local = strategy(&host);
        let other = strategy(&remote);
        local.start(&root).await.unwrap();
        other.start(&root).await.unwrap();

        let mut peers = local.discover_peers(root.clone()).unwrap();
        let found = peers.next().await.unwrap();
        assert_eq!(found.id, remote.id());

        // Next poll happens after the retry timeout and finds the same peer.
        let again = peers.next().await.unwrap();
        assert_eq!(again.id, remote.id());
        assert!(host.find_calls() >= 2);

        root.cancel();
        local.stop().await.unwrap();
        other.stop().await.unwrap();
        assert!(peers.next().await.is_none());
    }

    #[tokio::test]
    async fn test_bootstrap_failure_is_start_error() {
        let mesh = MemoryMesh::new();
        let host = mesh.host();
        host.set_bootstrap_failure(true);
        let discovery = strategy(&host);

        let err = discovery.start(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::StrategyStart {
                strategy: "dht",
                source: TransportError::Query(_)
            }
        ));
        assert!(discovery.discover_peers(CancellationToken::new()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_is_retried() {
        let mesh = MemoryMesh::new();
        let host = mesh.host();
        let remote = mesh.host();
        let root = CancellationToken::new();
        let discovery = strategy(&host);
        discovery.start(&root).await.unwrap();
        remote.advertise_tag(&DiscoveryConfig::default().service_tag);

        host.set_find_failure(true);
        let mut peers = discovery.discover_peers(root.clone()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(host.find_calls(), 1);

        host.set_find_failure(false);
        let found = peers.next().await.unwrap();
        assert_eq!(found.id, remote.id());
        assert_eq!(host.find_calls(), 2);

        discovery.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let mesh = MemoryMesh::new();
        let host = mesh.host();
        let discovery = strategy(&host);
        let root = CancellationToken::new();
        discovery.start(&root).await.unwrap();
        assert!(matches!(
            discovery.start(&root).await,
            Err(DiscoveryError::AlreadyStarted("dht"))
        ));
        discovery.stop().await.unwrap();
    }
}
