//! libp2p implementation of the transport capabilities.
//!
//! A single driver task owns the [`Swarm`]. [`Libp2pHost`] talks to it over a
//! command channel and reads the membership/connection view the driver keeps
//! in [`SharedState`], so peer listings never wait on the driver.

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::core::{upgrade, Multiaddr};
use libp2p::gossipsub::{
    self, Behaviour as Gossipsub, ConfigBuilder as GossipsubConfigBuilder, IdentTopic,
    MessageAuthenticity, TopicHash, ValidationMode,
};
use libp2p::multiaddr::Protocol;
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::{Config as SwarmConfig, DialError, NetworkBehaviour, Swarm, SwarmEvent};
use libp2p::{
    dns, identify, identity, kad, mdns, noise, ping, tcp, yamux, PeerId, Transport, TransportExt,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::bandwidth::{BandwidthCounter, GOSSIPSUB_PROTOCOL};
use super::transport::{
    Connector, Delivery, DiscoverySource, Host, LocalAnnouncer, NetworkStats, PeerFoundHandler,
    PeerRecord, PubSub, RoutingOverlay, Subscription, Topic, TransportResult,
};
use crate::config::NodeConfig;
use crate::error::TransportError;

const IDENTIFY_PROTOCOL: &str = "/meshchat/1.0.0";

type Reply<T> = oneshot::Sender<TransportResult<T>>;

#[derive(Debug)]
enum Command {
    Dial {
        peer: PeerId,
        addrs: Vec<Multiaddr>,
        reply: Reply<()>,
    },
    Join {
        topic: String,
        reply: Reply<()>,
    },
    Subscribe {
        topic: String,
        reply: Reply<mpsc::UnboundedReceiver<Delivery>>,
    },
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: Reply<()>,
    },
    Bootstrap {
        reply: Reply<()>,
    },
    StartProviding {
        tag: String,
        reply: Reply<()>,
    },
    GetProviders {
        tag: String,
        reply: Reply<Vec<PeerRecord>>,
    },
    Shutdown,
}

#[derive(NetworkBehaviour)]
struct ChatBehaviour {
    gossipsub: Gossipsub,
    mdns: Toggle<mdns::tokio::Behaviour>,
    kademlia: Toggle<kad::Behaviour<kad::store::MemoryStore>>,
    identify: identify::Behaviour,
    ping: ping::Behaviour,
}

/// State written by the driver and read synchronously by the host.
#[derive(Default)]
struct SharedState {
    topic_peers: RwLock<HashMap<TopicHash, HashSet<PeerId>>>,
    connections: RwLock<HashMap<PeerId, u32>>,
    listen_addrs: RwLock<Vec<Multiaddr>>,
    peer_found: Mutex<Option<PeerFoundHandler>>,
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// The node's one transport handle.
pub struct Libp2pHost {
    local_peer_id: PeerId,
    command_tx: mpsc::Sender<Command>,
    state: Arc<SharedState>,
    bandwidth: Arc<BandwidthCounter>,
    mdns_enabled: bool,
    driver: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Libp2pHost {
    /// Builds the swarm, binds the listen addresses and spawns the driver.
    pub async fn new(config: &NodeConfig) -> TransportResult<Self> {
        let keypair = identity::Keypair::generate_ed25519();
        let peer_id = PeerId::from(keypair.public());

        let tcp_transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true));
        let transport = dns::tokio::Transport::system(tcp_transport)
            .map_err(|e| TransportError::Startup(format!("dns resolver: {e}")))?
            .upgrade(upgrade::Version::V1)
            .authenticate(noise_config(&keypair)?)
            .multiplex(yamux::Config::default())
            .boxed();
        // Every substream byte is counted for the aggregate bandwidth figure.
        #[allow(deprecated)]
        let (transport, sinks) = transport.with_bandwidth_logging();

        let mdns = if config.enable_mdns {
            let behaviour = mdns::tokio::Behaviour::new(mdns::Config::default(), peer_id)
                .map_err(|e| TransportError::Startup(format!("mdns: {e}")))?;
            Some(behaviour)
        } else {
            None
        };

        let kademlia = config.enable_dht.then(|| {
            let mut kademlia =
                kad::Behaviour::new(peer_id, kad::store::MemoryStore::new(peer_id));
            kademlia.set_mode(Some(kad::Mode::Server));
            kademlia
        });

        let behaviour = ChatBehaviour {
            gossipsub: build_gossipsub(&keypair)?,
            mdns: Toggle::from(mdns),
            kademlia: Toggle::from(kademlia),
            identify: identify::Behaviour::new(identify::Config::new(
                IDENTIFY_PROTOCOL.into(),
                keypair.public(),
            )),
            ping: ping::Behaviour::default(),
        };

        let swarm_config =
            SwarmConfig::with_tokio_executor().with_idle_connection_timeout(Duration::from_secs(60));
        let mut swarm = Swarm::new(transport, behaviour, peer_id, swarm_config);

        let listen_addrs = parse_multiaddrs(&config.listen_addresses)?;
        let mut bound = 0;
        for addr in listen_addrs {
            match swarm.listen_on(addr.clone()) {
                Ok(_) => bound += 1,
                Err(e) => warn!("Failed to listen on {addr}: {e}"),
            }
        }
        if bound == 0 {
            return Err(TransportError::Startup(
                "could not listen on any configured address".to_string(),
            ));
        }

        let bootstrap = parse_bootstrap_nodes(&config.bootstrap_nodes)?;

        let state = Arc::new(SharedState::default());
        let bandwidth = Arc::new(BandwidthCounter::from_transport(sinks));
        let (command_tx, command_rx) = mpsc::channel(64);

        let driver = SwarmDriver {
            swarm,
            bootstrap,
            state: state.clone(),
            bandwidth: bandwidth.clone(),
            subscribers: HashMap::new(),
            pending_dials: HashMap::new(),
            pending_providers: HashMap::new(),
        };
        let handle = tokio::spawn(driver.run(command_rx));

        info!("Local peer id: {peer_id}");
        Ok(Self {
            local_peer_id: peer_id,
            command_tx,
            state,
            bandwidth,
            mdns_enabled: config.enable_mdns,
            driver: tokio::sync::Mutex::new(Some(handle)),
        })
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> TransportResult<T> {
        request(&self.command_tx, make).await
    }
}

async fn request<T>(
    command_tx: &mpsc::Sender<Command>,
    make: impl FnOnce(Reply<T>) -> Command,
) -> TransportResult<T> {
    let (reply, rx) = oneshot::channel();
    command_tx
        .send(make(reply))
        .await
        .map_err(|_| TransportError::ChannelClosed)?;
    rx.await.map_err(|_| TransportError::ChannelClosed)?
}

#[async_trait]
impl Host for Libp2pHost {
    /// Stops the driver and waits for it to exit.
    async fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown).await;
        if let Some(handle) = self.driver.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("swarm driver exited abnormally: {e}");
            }
        }
    }
}

#[async_trait]
impl Connector for Libp2pHost {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    async fn connect(&self, peer: &PeerRecord) -> TransportResult<()> {
        let (id, addrs) = (peer.id, peer.addrs.clone());
        self.request(|reply| Command::Dial {
            peer: id,
            addrs,
            reply,
        })
        .await
    }
}

#[async_trait]
impl PubSub for Libp2pHost {
    async fn join_topic(&self, name: &str) -> TransportResult<Arc<dyn Topic>> {
        let topic = name.to_string();
        self.request(|reply| Command::Join { topic, reply }).await?;
        Ok(Arc::new(Libp2pTopic {
            name: name.to_string(),
            command_tx: self.command_tx.clone(),
        }))
    }

    fn list_peers(&self, topic: &str) -> Vec<PeerId> {
        let hash = IdentTopic::new(topic).hash();
        read(&self.state.topic_peers)
            .get(&hash)
            .map(|peers| peers.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl LocalAnnouncer for Libp2pHost {
    fn register(&self, service_tag: &str, handler: PeerFoundHandler) -> TransportResult<()> {
        if !self.mdns_enabled {
            return Err(TransportError::Disabled("mdns"));
        }
        // libp2p-mdns announces under the fixed libp2p service name.
        debug!("mDNS listener registered for {service_tag}");
        *self
            .state
            .peer_found
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
        Ok(())
    }

    fn unregister(&self) {
        self.state
            .peer_found
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[async_trait]
impl RoutingOverlay for Libp2pHost {
    async fn bootstrap(&self) -> TransportResult<()> {
        self.request(|reply| Command::Bootstrap { reply }).await
    }

    async fn advertise(&self, tag: &str) -> TransportResult<()> {
        let tag = tag.to_string();
        self.request(|reply| Command::StartProviding { tag, reply })
            .await
    }

    async fn find_peers(&self, tag: &str) -> TransportResult<Vec<PeerRecord>> {
        let tag = tag.to_string();
        self.request(|reply| Command::GetProviders { tag, reply })
            .await
    }
}

impl NetworkStats for Libp2pHost {
    fn connected_peers(&self) -> usize {
        read(&self.state.connections).len()
    }

    fn open_connections(&self) -> usize {
        read(&self.state.connections)
            .values()
            .map(|n| *n as usize)
            .sum()
    }

    fn listen_addrs(&self) -> Vec<Multiaddr> {
        read(&self.state.listen_addrs).clone()
    }

    fn bandwidth(&self) -> Arc<BandwidthCounter> {
        self.bandwidth.clone()
    }
}

struct Libp2pTopic {
    name: String,
    command_tx: mpsc::Sender<Command>,
}

#[async_trait]
impl Topic for Libp2pTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, data: Vec<u8>) -> TransportResult<()> {
        let topic = self.name.clone();
        request(&self.command_tx, |reply| Command::Publish { topic, data, reply }).await
    }

    async fn subscribe(&self) -> TransportResult<Box<dyn Subscription>> {
        let topic = self.name.clone();
        let rx = request(&self.command_tx, |reply| Command::Subscribe { topic, reply }).await?;
        Ok(Box::new(Libp2pSubscription { rx }))
    }
}

struct Libp2pSubscription {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
impl Subscription for Libp2pSubscription {
    async fn next(&mut self) -> TransportResult<Delivery> {
        self.rx.recv().await.ok_or(TransportError::ChannelClosed)
    }
}

struct PendingProviders {
    reply: Reply<Vec<PeerRecord>>,
    found: HashSet<PeerId>,
    error: Option<String>,
}

struct SwarmDriver {
    swarm: Swarm<ChatBehaviour>,
    bootstrap: Vec<(PeerId, Multiaddr)>,
    state: Arc<SharedState>,
    bandwidth: Arc<BandwidthCounter>,
    subscribers: HashMap<TopicHash, Vec<mpsc::UnboundedSender<Delivery>>>,
    pending_dials: HashMap<PeerId, Vec<Reply<()>>>,
    pending_providers: HashMap<kad::QueryId, PendingProviders>,
}

impl SwarmDriver {
    async fn run(mut self, mut command_rx: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                event = self.swarm.select_next_some() => self.handle_event(event),
            }
        }
        debug!("swarm driver stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Dial { peer, addrs, reply } => self.dial(peer, addrs, reply),
            Command::Join { topic, reply } => {
                let result = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .subscribe(&IdentTopic::new(topic))
                    .map(|_| ())
                    .map_err(|e| TransportError::Subscribe(e.to_string()));
                let _ = reply.send(result);
            }
            Command::Subscribe { topic, reply } => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.subscribers
                    .entry(IdentTopic::new(topic).hash())
                    .or_default()
                    .push(tx);
                let _ = reply.send(Ok(rx));
            }
            Command::Publish { topic, data, reply } => {
                let len = data.len();
                let result = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(IdentTopic::new(topic), data)
                    .map(|_| self.bandwidth.log_sent(GOSSIPSUB_PROTOCOL, len))
                    .map_err(|e| TransportError::Publish(e.to_string()));
                let _ = reply.send(result);
            }
            Command::Bootstrap { reply } => {
                let _ = reply.send(self.bootstrap());
            }
            Command::StartProviding { tag, reply } => {
                let result = match self.swarm.behaviour_mut().kademlia.as_mut() {
                    Some(kademlia) => kademlia
                        .start_providing(kad::RecordKey::new(&tag))
                        .map(|_| ())
                        .map_err(|e| TransportError::Query(e.to_string())),
                    None => Err(TransportError::Disabled("dht")),
                };
                let _ = reply.send(result);
            }
            Command::GetProviders { tag, reply } => {
                match self.swarm.behaviour_mut().kademlia.as_mut() {
                    Some(kademlia) => {
                        let id = kademlia.get_providers(kad::RecordKey::new(&tag));
                        self.pending_providers.insert(
                            id,
                            PendingProviders {
                                reply,
                                found: HashSet::new(),
                                error: None,
                            },
                        );
                    }
                    None => {
                        let _ = reply.send(Err(TransportError::Disabled("dht")));
                    }
                }
            }
            Command::Shutdown => {}
        }
    }

    fn dial(&mut self, peer: PeerId, addrs: Vec<Multiaddr>, reply: Reply<()>) {
        if self.swarm.is_connected(&peer) {
            let _ = reply.send(Ok(()));
            return;
        }
        let waiting = self.pending_dials.entry(peer).or_default();
        waiting.push(reply);
        if waiting.len() > 1 {
            return;
        }
        let opts = DialOpts::peer_id(peer).addresses(addrs).build();
        match self.swarm.dial(opts) {
            Ok(()) => {}
            // A dial to this peer is already in flight; its outcome resolves us.
            Err(DialError::DialPeerConditionFalse(_)) => {}
            Err(e) => self.resolve_dial(&peer, Err(TransportError::Dial(e.to_string()))),
        }
    }

    fn resolve_dial(&mut self, peer: &PeerId, result: TransportResult<()>) {
        let Some(waiting) = self.pending_dials.remove(peer) else {
            return;
        };
        for reply in waiting {
            let outcome = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(TransportError::Dial(e.to_string())),
            };
            let _ = reply.send(outcome);
        }
    }

    fn bootstrap(&mut self) -> TransportResult<()> {
        let Some(kademlia) = self.swarm.behaviour_mut().kademlia.as_mut() else {
            return Err(TransportError::Disabled("dht"));
        };
        for (peer, addr) in &self.bootstrap {
            kademlia.add_address(peer, addr.clone());
        }
        kademlia
            .bootstrap()
            .map_err(|e| TransportError::Query(e.to_string()))?;

        for (peer, addr) in self.bootstrap.clone() {
            if let Err(e) = self.swarm.dial(addr.clone()) {
                debug!("failed to dial bootstrap peer {peer}: {e}");
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, event: SwarmEvent<ChatBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {address}");
                write(&self.state.listen_addrs).push(address);
            }
            SwarmEvent::ExpiredListenAddr { address, .. } => {
                write(&self.state.listen_addrs).retain(|a| a != &address);
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                num_established,
                ..
            } => {
                debug!("Connection established with peer {peer_id}");
                write(&self.state.connections).insert(peer_id, num_established.get());
                if self.bootstrap.iter().any(|(p, _)| p == &peer_id) {
                    info!("connected to bootstrap peer: {peer_id}");
                }
                self.resolve_dial(&peer_id, Ok(()));
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                debug!("Connection closed with peer {peer_id}");
                if num_established == 0 {
                    write(&self.state.connections).remove(&peer_id);
                    for peers in write(&self.state.topic_peers).values_mut() {
                        peers.remove(&peer_id);
                    }
                } else {
                    write(&self.state.connections).insert(peer_id, num_established);
                }
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                if !self.swarm.is_connected(&peer_id) {
                    self.resolve_dial(&peer_id, Err(TransportError::Dial(error.to_string())));
                }
            }
            SwarmEvent::Behaviour(ChatBehaviourEvent::Gossipsub(event)) => {
                self.handle_gossipsub_event(event)
            }
            SwarmEvent::Behaviour(ChatBehaviourEvent::Mdns(event)) => self.handle_mdns_event(event),
            SwarmEvent::Behaviour(ChatBehaviourEvent::Kademlia(event)) => {
                self.handle_kad_event(event)
            }
            SwarmEvent::Behaviour(ChatBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                debug!("Peer identification completed: {peer_id} ({})", info.agent_version);
                if let Some(kademlia) = self.swarm.behaviour_mut().kademlia.as_mut() {
                    for addr in info.listen_addrs {
                        kademlia.add_address(&peer_id, addr);
                    }
                }
            }
            other => debug!("swarm event: {other:?}"),
        }
    }

    fn handle_gossipsub_event(&mut self, event: gossipsub::Event) {
        match event {
            gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            } => {
                self.bandwidth
                    .log_recv(GOSSIPSUB_PROTOCOL, message.data.len());
                if let Some(senders) = self.subscribers.get_mut(&message.topic) {
                    senders.retain(|tx| {
                        tx.send(Delivery {
                            data: message.data.clone(),
                            received_from: propagation_source,
                        })
                        .is_ok()
                    });
                }
            }
            gossipsub::Event::Subscribed { peer_id, topic } => {
                debug!("Peer {peer_id} subscribed to topic {topic}");
                write(&self.state.topic_peers)
                    .entry(topic)
                    .or_default()
                    .insert(peer_id);
            }
            gossipsub::Event::Unsubscribed { peer_id, topic } => {
                debug!("Peer {peer_id} unsubscribed from topic {topic}");
                if let Some(peers) = write(&self.state.topic_peers).get_mut(&topic) {
                    peers.remove(&peer_id);
                }
            }
            other => debug!("gossipsub event: {other:?}"),
        }
    }

    fn handle_mdns_event(&mut self, event: mdns::Event) {
        match event {
            mdns::Event::Discovered(list) => {
                let mut by_peer: HashMap<PeerId, Vec<Multiaddr>> = HashMap::new();
                for (peer, addr) in list {
                    by_peer.entry(peer).or_default().push(addr);
                }
                let handler = self
                    .state
                    .peer_found
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                for (peer, addrs) in by_peer {
                    debug!("mDNS discovered {peer} at {addrs:?}");
                    if let Some(kademlia) = self.swarm.behaviour_mut().kademlia.as_mut() {
                        for addr in &addrs {
                            kademlia.add_address(&peer, addr.clone());
                        }
                    }
                    if let Some(handler) = &handler {
                        handler(PeerRecord::new(peer, addrs, DiscoverySource::LocalNetwork));
                    }
                }
            }
            mdns::Event::Expired(list) => {
                for (peer, _addr) in list {
                    debug!("mDNS expired for {peer}");
                }
            }
        }
    }

    fn handle_kad_event(&mut self, event: kad::Event) {
        match event {
            kad::Event::OutboundQueryProgressed {
                id, result, step, ..
            } => match result {
                kad::QueryResult::GetProviders(result) => {
                    if let Some(pending) = self.pending_providers.get_mut(&id) {
                        match result {
                            Ok(kad::GetProvidersOk::FoundProviders { providers, .. }) => {
                                pending.found.extend(providers)
                            }
                            Ok(kad::GetProvidersOk::FinishedWithNoAdditionalRecord { .. }) => {}
                            Err(e) => pending.error = Some(e.to_string()),
                        }
                    }
                    if step.last {
                        self.finish_providers_query(id);
                    }
                }
                kad::QueryResult::StartProviding(result) => {
                    debug!("DHT advertisement result: {result:?}")
                }
                kad::QueryResult::Bootstrap(result) => debug!("DHT bootstrap progress: {result:?}"),
                other => debug!("Kademlia query progressed: {other:?}"),
            },
            kad::Event::RoutingUpdated { peer, .. } => debug!("DHT routing table added {peer}"),
            other => debug!("Kademlia event: {other:?}"),
        }
    }

    fn finish_providers_query(&mut self, id: kad::QueryId) {
        let Some(pending) = self.pending_providers.remove(&id) else {
            return;
        };
        let result = match pending.error {
            Some(error) if pending.found.is_empty() => Err(TransportError::Query(error)),
            _ => Ok(pending
                .found
                .into_iter()
                .map(|peer| PeerRecord::new(peer, Vec::new(), DiscoverySource::RoutedNetwork))
                .collect()),
        };
        let _ = pending.reply.send(result);
    }
}

fn noise_config(keypair: &identity::Keypair) -> TransportResult<noise::Config> {
    noise::Config::new(keypair).map_err(|e| TransportError::Startup(e.to_string()))
}

fn build_gossipsub(keypair: &identity::Keypair) -> TransportResult<Gossipsub> {
    let message_authenticity = MessageAuthenticity::Signed(keypair.clone());
    // Chat rooms are small; let the mesh form with a single peer.
    // Constraint: mesh_outbound_min <= mesh_n_low <= mesh_n <= mesh_n_high
    let config = GossipsubConfigBuilder::default()
        .validation_mode(ValidationMode::Strict)
        .mesh_outbound_min(1)
        .mesh_n_low(1)
        .mesh_n(3)
        .mesh_n_high(6)
        .heartbeat_interval(Duration::from_secs(1))
        .build()
        .map_err(|e| TransportError::Startup(e.to_string()))?;
    Gossipsub::new(message_authenticity, config)
        .map_err(|e: &'static str| TransportError::Startup(e.to_string()))
}

fn parse_multiaddrs(addrs: &[String]) -> TransportResult<Vec<Multiaddr>> {
    addrs
        .iter()
        .map(|addr| {
            addr.parse::<Multiaddr>()
                .map_err(|e| TransportError::InvalidAddress(format!("{addr}: {e}")))
        })
        .collect()
}

/// Bootstrap addresses must end in `/p2p/<peer id>`.
fn parse_bootstrap_nodes(addrs: &[String]) -> TransportResult<Vec<(PeerId, Multiaddr)>> {
    parse_multiaddrs(addrs)?
        .into_iter()
        .map(|addr| match addr.iter().last() {
            Some(Protocol::P2p(peer)) => Ok((peer, addr)),
            _ => Err(TransportError::InvalidAddress(format!(
                "{addr}: missing /p2p/ peer id"
            ))),
        })
        .collect()
}
