//! Node lifecycle: one transport handle, its discovery strategies and telemetry.

use libp2p::{Multiaddr, PeerId};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use super::bandwidth::RateSampler;
use super::discovery::{
    DiscoveryCoordinator, LocalNetworkDiscovery, PeerDiscovery, RoutedNetworkDiscovery,
};
use super::libp2p_network::Libp2pHost;
use super::telemetry::{NodeStats, Telemetry};
use super::transport::{Connector, Host, NetworkStats};
use crate::chat::ChatRoom;
use crate::config::{ChatConfig, NodeConfig};
use crate::error::NodeError;
use crate::sink::SharedSink;

/// A running participant in the chat network.
///
/// The node holds the transport handle and forwards only what callers need:
/// its identity, room joins and statistics. Discovery and telemetry run as
/// tasks under the node's cancellation token.
pub struct Node<H: Host = Libp2pHost> {
    host: Arc<H>,
    coordinator: DiscoveryCoordinator,
    telemetry: Arc<Telemetry>,
    sink: SharedSink,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Node<Libp2pHost> {
    /// Creates the libp2p host and the discovery strategies enabled in `config`.
    pub async fn new(
        config: &NodeConfig,
        parent: &CancellationToken,
        sink: SharedSink,
    ) -> Result<Self, NodeError> {
        let host = Libp2pHost::new(config).await?;
        Ok(Self::with_host(Arc::new(host), config, parent, sink))
    }
}

impl<H: Host> Node<H> {
    pub fn with_host(
        host: Arc<H>,
        config: &NodeConfig,
        parent: &CancellationToken,
        sink: SharedSink,
    ) -> Self {
        let token = parent.child_token();
        let discovery = Arc::new(config.discovery.clone());
        let peer_id = host.local_peer_id();

        let mut strategies: Vec<Arc<dyn PeerDiscovery>> = Vec::new();
        if config.enable_dht {
            strategies.push(Arc::new(RoutedNetworkDiscovery::new(
                host.clone(),
                peer_id,
                discovery.clone(),
                sink.clone(),
            )));
        }
        if config.enable_mdns {
            strategies.push(Arc::new(LocalNetworkDiscovery::new(
                host.clone(),
                host.clone(),
                discovery.clone(),
                sink.clone(),
            )));
        }

        let coordinator = DiscoveryCoordinator::new(
            strategies,
            host.clone(),
            discovery.connect_timeout,
            sink.clone(),
            &token,
        );
        let telemetry = Arc::new(Telemetry::new(
            peer_id,
            host.clone(),
            Some(host.clone()),
            sink.clone(),
            config.stats_interval,
        ));

        Self {
            host,
            coordinator,
            telemetry,
            sink,
            token,
            tracker: TaskTracker::new(),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.host.local_peer_id()
    }

    pub fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.host.listen_addrs()
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Names of the enabled discovery strategies, in start order.
    pub fn strategies(&self) -> Vec<&'static str> {
        self.coordinator.strategies().collect()
    }

    /// Joins `config.room` as `config.nickname`. The room's topic is added
    /// to the telemetry samples.
    pub async fn join_room(&self, config: &ChatConfig) -> Result<ChatRoom, NodeError> {
        let room = ChatRoom::join(
            self.host.clone(),
            self.peer_id(),
            &config.nickname,
            &config.room,
            &self.token,
            self.sink.clone(),
        )
        .await?;
        self.telemetry.watch_topic(room.topic_name());
        Ok(room)
    }

    /// Starts discovery, the per-strategy connection tasks and telemetry.
    pub async fn start(&self) -> Result<(), NodeError> {
        self.coordinator.start().await?;
        self.coordinator.run()?;
        self.telemetry.spawn(&self.tracker, self.token.clone());
        info!("node {} started", self.peer_id());
        Ok(())
    }

    /// A one-off sample. Rates are zero since there is no previous sample.
    pub fn stats(&self) -> NodeStats {
        self.telemetry.sample(&mut RateSampler::new())
    }

    /// Cancels every node task, waits for them and releases the transport.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.coordinator.stop().await;
        self.tracker.close();
        self.tracker.wait().await;
        self.host.shutdown().await;
        info!("node {} stopped", self.peer_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DiscoveryError, TransportError};
    use crate::p2p::transport::{DiscoverySource, RoutingOverlay};
    use crate::sink::NullSink;
    use crate::testing::{MemoryHost, MemoryMesh};
    use std::time::Duration;

    fn node(host: &Arc<MemoryHost>, root: &CancellationToken) -> Node<MemoryHost> {
        Node::with_host(
            host.clone(),
            &NodeConfig::default(),
            root,
            Arc::new(NullSink),
        )
    }

    #[tokio::test]
    async fn test_two_nodes_chat_in_general() {
        let mesh = MemoryMesh::new();
        let root = CancellationToken::new();
        let a = node(&mesh.host(), &root);
        let b = node(&mesh.host(), &root);
        assert_eq!(a.strategies(), vec!["dht", "mdns"]);

        let room_a = a.join_room(&ChatConfig::new("alice", "general")).await.unwrap();
        let room_b = b.join_room(&ChatConfig::new("bob", "general")).await.unwrap();
        a.start().await.unwrap();
        b.start().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !room_b.list_peers().contains(&a.peer_id()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        room_a.publish("hi").await.unwrap();
        let msg = tokio::time::timeout(Duration::from_secs(5), room_b.next_message())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.message, "hi");
        assert_eq!(msg.sender_id, a.peer_id().to_string());
        assert_eq!(msg.sender_nick, "alice");

        let stats = b.stats();
        assert_eq!(stats.topic_peers, vec![("chat-room:general".to_string(), 1)]);
        assert!(stats.connected_peers >= 1);

        root.cancel();
        room_a.close().await;
        room_b.close().await;
        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_strategy_aborts_start() {
        let mesh = MemoryMesh::new();
        let host = mesh.host();
        let remote = mesh.host();
        host.set_bootstrap_failure(true);
        let root = CancellationToken::new();
        let node = node(&host, &root);

        let err = node.start().await.unwrap_err();
        assert!(matches!(
            err,
            NodeError::Discovery(DiscoveryError::StrategyStart {
                strategy: "dht",
                source: TransportError::Query(_),
            })
        ));

        // mDNS comes after the DHT and was never registered.
        host.announce(remote.record(DiscoverySource::LocalNetwork));
        assert!(host.connect_attempts().is_empty());
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let mesh = MemoryMesh::new();
        let host = mesh.host();
        let root = CancellationToken::new();
        let config = NodeConfig {
            enable_dht: false,
            ..NodeConfig::default()
        };
        let node = Node::with_host(host.clone(), &config, &root, Arc::new(NullSink));
        assert_eq!(node.strategies(), vec!["mdns"]);

        let room = node
            .join_room(&ChatConfig::new("alice", "general"))
            .await
            .unwrap();
        node.start().await.unwrap();

        root.cancel();
        tokio::time::timeout(Duration::from_secs(5), async {
            room.close().await;
            node.shutdown().await;
        })
        .await
        .unwrap();
        assert_eq!(node.coordinator.active_tasks(), 0);
        assert_eq!(node.tracker.len(), 0);
        assert!(matches!(
            host.find_peers("pubsub-chat-example").await,
            Err(TransportError::ChannelClosed)
        ));
    }
}
