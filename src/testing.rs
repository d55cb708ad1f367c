//! In-memory transport used by the unit tests.
//!
//! A [`MemoryMesh`] connects any number of [`MemoryHost`]s. Hosts implement
//! every transport capability; failures are switched on per host.

use async_trait::async_trait;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::p2p::bandwidth::{BandwidthCounter, GOSSIPSUB_PROTOCOL};
use crate::p2p::transport::{
    Connector, Delivery, DiscoverySource, Host, LocalAnnouncer, NetworkStats, PeerFoundHandler,
    PeerRecord, PubSub, RoutingOverlay, Subscription, Topic, TransportResult,
};

#[derive(Default)]
struct MeshState {
    addrs: HashMap<PeerId, Multiaddr>,
    links: HashSet<(PeerId, PeerId)>,
    announcers: HashMap<PeerId, PeerFoundHandler>,
    providers: HashMap<String, HashSet<PeerId>>,
    members: HashMap<String, HashSet<PeerId>>,
    subscribers: HashMap<String, Vec<(PeerId, mpsc::UnboundedSender<Delivery>)>>,
    bandwidth: HashMap<PeerId, Arc<BandwidthCounter>>,
}

impl MeshState {
    fn linked(&self, a: &PeerId, b: &PeerId) -> bool {
        self.links.contains(&(*a, *b))
    }

    fn record(&self, id: PeerId, source: DiscoverySource) -> PeerRecord {
        PeerRecord::new(id, self.addrs.get(&id).cloned().into_iter().collect(), source)
    }
}

#[derive(Default)]
pub(crate) struct MemoryMesh {
    state: Mutex<MeshState>,
    next_port: AtomicU64,
}

impl MemoryMesh {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, MeshState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn host(self: &Arc<Self>) -> Arc<MemoryHost> {
        let id = PeerId::random();
        let port = self.next_port.fetch_add(1, Ordering::SeqCst) + 1;
        let addr = Multiaddr::empty().with(Protocol::Memory(port));
        let bandwidth = Arc::new(BandwidthCounter::new());
        {
            let mut mesh = self.lock();
            mesh.addrs.insert(id, addr);
            mesh.bandwidth.insert(id, bandwidth.clone());
        }
        Arc::new(MemoryHost {
            id,
            mesh: self.clone(),
            flags: Arc::new(Mutex::new(Flags::default())),
            bandwidth,
        })
    }
}

#[derive(Default)]
struct Flags {
    connect_failure: bool,
    announcer_failure: bool,
    bootstrap_failure: bool,
    find_failure: bool,
    publish_failure: bool,
    closed: bool,
    find_calls: usize,
    publish_calls: usize,
    attempts: Vec<(PeerId, Instant)>,
}

pub(crate) struct MemoryHost {
    id: PeerId,
    mesh: Arc<MemoryMesh>,
    flags: Arc<Mutex<Flags>>,
    bandwidth: Arc<BandwidthCounter>,
}

impl MemoryHost {
    fn flags(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap()
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.flags().closed {
            return Err(TransportError::ChannelClosed);
        }
        Ok(())
    }

    pub(crate) fn id(&self) -> PeerId {
        self.id
    }

    pub(crate) fn record(&self, source: DiscoverySource) -> PeerRecord {
        self.mesh.lock().record(self.id, source)
    }

    /// Delivers `peer` to this host's registered announcement handler.
    pub(crate) fn announce(&self, peer: PeerRecord) {
        let handler = self.mesh.lock().announcers.get(&self.id).cloned();
        if let Some(handler) = handler {
            handler(peer);
        }
    }

    pub(crate) fn is_connected(&self, peer: &PeerId) -> bool {
        self.mesh.lock().linked(&self.id, peer)
    }

    pub(crate) fn connect_attempts(&self) -> Vec<(PeerId, Instant)> {
        self.flags().attempts.clone()
    }

    pub(crate) fn set_connect_failure(&self, fail: bool) {
        self.flags().connect_failure = fail;
    }

    pub(crate) fn set_announcer_failure(&self, fail: bool) {
        self.flags().announcer_failure = fail;
    }

    pub(crate) fn set_bootstrap_failure(&self, fail: bool) {
        self.flags().bootstrap_failure = fail;
    }

    pub(crate) fn set_find_failure(&self, fail: bool) {
        self.flags().find_failure = fail;
    }

    pub(crate) fn set_publish_failure(&self, fail: bool) {
        self.flags().publish_failure = fail;
    }

    pub(crate) fn find_calls(&self) -> usize {
        self.flags().find_calls
    }

    pub(crate) fn publish_calls(&self) -> usize {
        self.flags().publish_calls
    }

    /// Registers this host as a provider of `tag` without going through a strategy.
    pub(crate) fn advertise_tag(&self, tag: &str) {
        self.mesh
            .lock()
            .providers
            .entry(tag.to_string())
            .or_default()
            .insert(self.id);
    }

    /// Hands `delivery` to this host's own subscribers of `topic`.
    pub(crate) fn inject(&self, topic: &str, delivery: Delivery) {
        let mesh = self.mesh.lock();
        for (owner, tx) in mesh.subscribers.get(topic).into_iter().flatten() {
            if *owner == self.id {
                let _ = tx.send(delivery.clone());
            }
        }
    }

    /// Ends every subscription this host holds.
    pub(crate) fn close_subscriptions(&self) {
        let mut mesh = self.mesh.lock();
        for subs in mesh.subscribers.values_mut() {
            subs.retain(|(owner, _)| *owner != self.id);
        }
    }
}

#[async_trait]
impl Connector for MemoryHost {
    fn local_peer_id(&self) -> PeerId {
        self.id
    }

    async fn connect(&self, peer: &PeerRecord) -> TransportResult<()> {
        let fail = {
            let mut flags = self.flags();
            flags.attempts.push((peer.id, Instant::now()));
            if flags.closed {
                return Err(TransportError::ChannelClosed);
            }
            flags.connect_failure
        };
        if fail {
            return Err(TransportError::Dial(format!("{} refused", peer.id)));
        }
        let mut mesh = self.mesh.lock();
        if !mesh.addrs.contains_key(&peer.id) {
            return Err(TransportError::Dial(format!("{} unreachable", peer.id)));
        }
        mesh.links.insert((self.id, peer.id));
        mesh.links.insert((peer.id, self.id));
        Ok(())
    }
}

struct MemoryTopic {
    name: String,
    host: PeerId,
    mesh: Arc<MemoryMesh>,
    flags: Arc<Mutex<Flags>>,
}

#[async_trait]
impl Topic for MemoryTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, data: Vec<u8>) -> TransportResult<()> {
        {
            let mut flags = self.flags.lock().unwrap();
            if flags.closed {
                return Err(TransportError::ChannelClosed);
            }
            flags.publish_calls += 1;
            if flags.publish_failure {
                return Err(TransportError::Publish("no peers subscribed".to_string()));
            }
        }
        let mesh = self.mesh.lock();
        let size = data.len();
        if let Some(counter) = mesh.bandwidth.get(&self.host) {
            counter.log_sent(GOSSIPSUB_PROTOCOL, size);
        }
        for (owner, tx) in mesh.subscribers.get(&self.name).into_iter().flatten() {
            if *owner == self.host || mesh.linked(&self.host, owner) {
                if let Some(counter) = mesh.bandwidth.get(owner) {
                    counter.log_recv(GOSSIPSUB_PROTOCOL, size);
                }
                if *owner != self.host {
                    if let Some(counter) = mesh.bandwidth.get(&self.host) {
                        counter.log_wire_sent(size);
                    }
                    if let Some(counter) = mesh.bandwidth.get(owner) {
                        counter.log_wire_recv(size);
                    }
                }
                let _ = tx.send(Delivery {
                    data: data.clone(),
                    received_from: self.host,
                });
            }
        }
        Ok(())
    }

    async fn subscribe(&self) -> TransportResult<Box<dyn Subscription>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.mesh
            .lock()
            .subscribers
            .entry(self.name.clone())
            .or_default()
            .push((self.host, tx));
        Ok(Box::new(MemorySubscription { rx }))
    }
}

struct MemorySubscription {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> TransportResult<Delivery> {
        self.rx.recv().await.ok_or(TransportError::ChannelClosed)
    }
}

#[async_trait]
impl PubSub for MemoryHost {
    async fn join_topic(&self, name: &str) -> TransportResult<Arc<dyn Topic>> {
        self.ensure_open()?;
        self.mesh
            .lock()
            .members
            .entry(name.to_string())
            .or_default()
            .insert(self.id);

        Ok(Arc::new(MemoryTopic {
            name: name.to_string(),
            host: self.id,
            mesh: self.mesh.clone(),
            flags: self.flags.clone(),
        }))
    }

    fn list_peers(&self, topic: &str) -> Vec<PeerId> {
        let mesh = self.mesh.lock();
        mesh.members
            .get(topic)
            .into_iter()
            .flatten()
            .filter(|peer| **peer != self.id && mesh.linked(&self.id, peer))
            .copied()
            .collect()
    }
}

impl LocalAnnouncer for MemoryHost {
    /// Registering also introduces this host to every other registered host.
    fn register(&self, _service_tag: &str, handler: PeerFoundHandler) -> TransportResult<()> {
        if self.flags().announcer_failure {
            return Err(TransportError::Disabled("mdns"));
        }
        let (me, others) = {
            let mut mesh = self.mesh.lock();
            mesh.announcers.insert(self.id, handler.clone());
            let me = mesh.record(self.id, DiscoverySource::LocalNetwork);
            let others: Vec<_> = mesh
                .announcers
                .iter()
                .filter(|(id, _)| **id != self.id)
                .map(|(id, h)| (mesh.record(*id, DiscoverySource::LocalNetwork), h.clone()))
                .collect();
            (me, others)
        };
        for (record, other) in others {
            other(me.clone());
            handler(record);
        }
        Ok(())
    }

    fn unregister(&self) {
        self.mesh.lock().announcers.remove(&self.id);
    }
}

#[async_trait]
impl RoutingOverlay for MemoryHost {
    async fn bootstrap(&self) -> TransportResult<()> {
        self.ensure_open()?;
        if self.flags().bootstrap_failure {
            return Err(TransportError::Query("no bootstrap peers reachable".to_string()));
        }
        Ok(())
    }

    async fn advertise(&self, tag: &str) -> TransportResult<()> {
        self.ensure_open()?;
        self.advertise_tag(tag);
        Ok(())
    }

    async fn find_peers(&self, tag: &str) -> TransportResult<Vec<PeerRecord>> {
        self.ensure_open()?;
        let fail = {
            let mut flags = self.flags();
            flags.find_calls += 1;
            flags.find_failure
        };
        if fail {
            return Err(TransportError::Query("providers lookup timed out".to_string()));
        }
        let mesh = self.mesh.lock();
        Ok(mesh
            .providers
            .get(tag)
            .into_iter()
            .flatten()
            .map(|id| mesh.record(*id, DiscoverySource::RoutedNetwork))
            .collect())
    }
}

impl NetworkStats for MemoryHost {
    fn connected_peers(&self) -> usize {
        self.mesh
            .lock()
            .links
            .iter()
            .filter(|(from, _)| *from == self.id)
            .count()
    }

    fn open_connections(&self) -> usize {
        self.connected_peers()
    }

    fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.record(DiscoverySource::LocalNetwork).addrs
    }

    fn bandwidth(&self) -> Arc<BandwidthCounter> {
        self.bandwidth.clone()
    }
}

#[async_trait]
impl Host for MemoryHost {
    async fn shutdown(&self) {
        self.flags().closed = true;
        let mut mesh = self.mesh.lock();
        let id = self.id;
        mesh.announcers.remove(&id);
        mesh.links.retain(|(a, b)| *a != id && *b != id);
        for subs in mesh.subscribers.values_mut() {
            subs.retain(|(owner, _)| *owner != id);
        }
        for members in mesh.members.values_mut() {
            members.remove(&id);
        }
    }
}
