//! Periodic sampling of transport statistics.

use libp2p::{Multiaddr, PeerId};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use super::bandwidth::{BandwidthStats, RateSampler, GOSSIPSUB_PROTOCOL};
use super::transport::{NetworkStats, PubSub};
use crate::sink::{Observation, SharedSink};

const AGGREGATE: &str = "all";

/// One telemetry sample.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStats {
    pub peer_id: PeerId,
    pub listen_addrs: Vec<Multiaddr>,
    pub bandwidth: BandwidthStats,
    pub pubsub_bandwidth: BandwidthStats,
    pub connected_peers: usize,
    pub open_connections: usize,
    /// Peer count per watched topic. Empty until a room is joined.
    pub topic_peers: Vec<(String, usize)>,
}

impl fmt::Display for NodeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "peers={} conns={} bandwidth[{}] pubsub[{}]",
            self.connected_peers, self.open_connections, self.bandwidth, self.pubsub_bandwidth
        )?;
        for (topic, peers) in &self.topic_peers {
            write!(f, " {topic}={peers}")?;
        }
        Ok(())
    }
}

pub struct Telemetry {
    peer_id: PeerId,
    network: Arc<dyn NetworkStats>,
    pubsub: Option<Arc<dyn PubSub>>,
    topics: RwLock<Vec<String>>,
    sink: SharedSink,
    interval: Duration,
}

impl Telemetry {
    pub fn new(
        peer_id: PeerId,
        network: Arc<dyn NetworkStats>,
        pubsub: Option<Arc<dyn PubSub>>,
        sink: SharedSink,
        interval: Duration,
    ) -> Self {
        Self {
            peer_id,
            network,
            pubsub,
            topics: RwLock::new(Vec::new()),
            sink,
            interval,
        }
    }

    /// Adds `topic` to the per-topic peer counts.
    pub fn watch_topic(&self, topic: &str) {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }
    }

    /// Reads every counter once. Never blocks on the transport.
    pub fn sample(&self, rates: &mut RateSampler) -> NodeStats {
        let now = tokio::time::Instant::now().into_std();
        let counter = self.network.bandwidth();
        let bandwidth = rates.sample(AGGREGATE, now, counter.totals());
        let pubsub_bandwidth =
            rates.sample(GOSSIPSUB_PROTOCOL, now, counter.totals_for(GOSSIPSUB_PROTOCOL));

        let topic_peers = match &self.pubsub {
            Some(pubsub) => self
                .topics
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|topic| (topic.clone(), pubsub.list_peers(topic).len()))
                .collect(),
            None => {
                debug!("pubsub not initialised, skipping topic stats");
                Vec::new()
            }
        };

        NodeStats {
            peer_id: self.peer_id,
            listen_addrs: self.network.listen_addrs(),
            bandwidth,
            pubsub_bandwidth,
            connected_peers: self.network.connected_peers(),
            open_connections: self.network.open_connections(),
            topic_peers,
        }
    }

    /// Emits a sample every interval until `token` fires. The first sample
    /// is taken one interval after spawning.
    pub fn spawn(self: &Arc<Self>, tracker: &TaskTracker, token: CancellationToken) {
        let telemetry = self.clone();
        tracker.spawn(async move {
            let mut rates = RateSampler::new();
            let start = tokio::time::Instant::now() + telemetry.interval;
            let mut ticker = tokio::time::interval_at(start, telemetry.interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let stats = telemetry.sample(&mut rates);
                        telemetry.sink.emit(&Observation::Telemetry(stats));
                    }
                }
            }
            debug!("telemetry stopped");
        });
    }
}
