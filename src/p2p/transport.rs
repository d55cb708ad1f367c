//! Capabilities the core consumes from the transport.
//!
//! The discovery and chat layers only see these traits. [`Libp2pHost`]
//! implements all of them; tests substitute an in-memory mesh.
//!
//! [`Libp2pHost`]: super::libp2p_network::Libp2pHost

use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId};
use std::fmt;
use std::sync::Arc;

use super::bandwidth::BandwidthCounter;
use crate::error::TransportError;

pub type TransportResult<T> = Result<T, TransportError>;

/// Which discovery strategy produced a [`PeerRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoverySource {
    LocalNetwork,
    RoutedNetwork,
}

impl DiscoverySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoverySource::LocalNetwork => "mdns",
            DiscoverySource::RoutedNetwork => "dht",
        }
    }
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A peer found by a discovery strategy. Dropped once the connection
/// succeeds or is abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub id: PeerId,
    pub addrs: Vec<Multiaddr>,
    pub source: DiscoverySource,
}

impl PeerRecord {
    pub fn new(id: PeerId, addrs: Vec<Multiaddr>, source: DiscoverySource) -> Self {
        Self { id, addrs, source }
    }
}

/// A payload delivered on a subscribed topic.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub data: Vec<u8>,
    /// Peer that handed us the message, not necessarily its author.
    pub received_from: PeerId,
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn local_peer_id(&self) -> PeerId;

    /// Establishes a connection to `peer`. Resolves immediately if one exists.
    async fn connect(&self, peer: &PeerRecord) -> TransportResult<()>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next delivery. `ChannelClosed` means no more will arrive.
    async fn next(&mut self) -> TransportResult<Delivery>;
}

#[async_trait]
pub trait Topic: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, data: Vec<u8>) -> TransportResult<()>;

    async fn subscribe(&self) -> TransportResult<Box<dyn Subscription>>;
}

#[async_trait]
pub trait PubSub: Send + Sync {
    async fn join_topic(&self, name: &str) -> TransportResult<Arc<dyn Topic>>;

    /// Current members of `topic` as seen by the pub/sub router. Never blocks.
    fn list_peers(&self, topic: &str) -> Vec<PeerId>;
}

/// Invoked once per peer heard on the local network.
pub type PeerFoundHandler = Arc<dyn Fn(PeerRecord) + Send + Sync>;

/// Local-network broadcast listening (mDNS).
pub trait LocalAnnouncer: Send + Sync {
    fn register(&self, service_tag: &str, handler: PeerFoundHandler) -> TransportResult<()>;

    fn unregister(&self);
}

/// Advertise/find-peers pair of the distributed routing overlay.
#[async_trait]
pub trait RoutingOverlay: Send + Sync {
    /// Enters the overlay through its bootstrap peers.
    async fn bootstrap(&self) -> TransportResult<()>;

    async fn advertise(&self, tag: &str) -> TransportResult<()>;

    async fn find_peers(&self, tag: &str) -> TransportResult<Vec<PeerRecord>>;
}

/// Read-only view used by telemetry.
pub trait NetworkStats: Send + Sync {
    fn connected_peers(&self) -> usize;

    fn open_connections(&self) -> usize;

    fn listen_addrs(&self) -> Vec<Multiaddr>;

    fn bandwidth(&self) -> Arc<BandwidthCounter>;
}

/// Everything a node needs from its transport, in one handle.
#[async_trait]
pub trait Host:
    Connector + PubSub + LocalAnnouncer + RoutingOverlay + NetworkStats + 'static
{
    /// Releases the transport. Calls made afterwards fail with `ChannelClosed`.
    async fn shutdown(&self);
}
