//! Runs every discovery strategy under one cancellation scope.

use futures::StreamExt;
use libp2p::PeerId;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::{PeerDiscovery, PeerStream};
use crate::error::{DiscoveryError, TransportError};
use crate::p2p::transport::Connector;
use crate::sink::{Observation, SharedSink};

const NAME: &str = "discovery coordinator";

/// Peers currently being dialed by some consumer task. First reservation wins.
#[derive(Default, Clone)]
struct InFlight(Arc<Mutex<HashSet<PeerId>>>);

impl InFlight {
    fn reserve(&self, peer: PeerId) -> Option<Reservation> {
        let inserted = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer);
        inserted.then(|| Reservation {
            peers: self.clone(),
            peer,
        })
    }
}

struct Reservation {
    peers: InFlight,
    peer: PeerId,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.peers
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.peer);
    }
}

pub struct DiscoveryCoordinator {
    strategies: Vec<Arc<dyn PeerDiscovery>>,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    sink: SharedSink,
    token: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
    running: AtomicBool,
    in_flight: InFlight,
}

impl DiscoveryCoordinator {
    pub fn new(
        strategies: Vec<Arc<dyn PeerDiscovery>>,
        connector: Arc<dyn Connector>,
        connect_timeout: Duration,
        sink: SharedSink,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            strategies,
            connector,
            connect_timeout,
            sink,
            token: parent.child_token(),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
            running: AtomicBool::new(false),
            in_flight: InFlight::default(),
        }
    }

    pub fn strategies(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.strategies.iter().map(|s| s.name())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of consumer tasks still alive.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Starts strategies in order and stops at the first failure; the ones
    /// after it are never started and the coordinator stays un-started.
    /// A stopped coordinator cannot be started again.
    pub async fn start(&self) -> Result<(), DiscoveryError> {
        if self.token.is_cancelled() {
            return Err(DiscoveryError::Stopped(NAME));
        }
        if self.is_started() {
            return Err(DiscoveryError::AlreadyStarted(NAME));
        }
        for strategy in &self.strategies {
            if let Err(e) = strategy.start(&self.token).await {
                error!("failed to start discovery service: {e}");
                return Err(e);
            }
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Spawns one consumer task per strategy.
    pub fn run(&self) -> Result<(), DiscoveryError> {
        if self.token.is_cancelled() {
            return Err(DiscoveryError::Stopped(NAME));
        }
        if !self.is_started() {
            return Err(DiscoveryError::NotStarted(NAME));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DiscoveryError::AlreadyStarted(NAME));
        }
        for strategy in &self.strategies {
            match strategy.discover_peers(self.token.clone()) {
                Ok(peers) => {
                    let consumer = Consumer {
                        source: strategy.name(),
                        connector: self.connector.clone(),
                        connect_timeout: self.connect_timeout,
                        sink: self.sink.clone(),
                        in_flight: self.in_flight.clone(),
                        token: self.token.clone(),
                    };
                    self.tracker.spawn(consumer.run(peers));
                }
                Err(e) => error!("failed to start peer discovery for {}: {e}", strategy.name()),
            }
        }
        Ok(())
    }

    /// Cancels the scope, stops every strategy and waits for all consumer tasks.
    pub async fn stop(&self) {
        self.token.cancel();
        for strategy in &self.strategies {
            if let Err(e) = strategy.stop().await {
                warn!("failed to stop {}: {e}", strategy.name());
            }
        }
        self.tracker.close();
        self.tracker.wait().await;
        info!("peer discovery stopped");
    }
}

struct Consumer {
    source: &'static str,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    sink: SharedSink,
    in_flight: InFlight,
    token: CancellationToken,
}

impl Consumer {
    async fn run(self, mut peers: PeerStream) {
        let local = self.connector.local_peer_id();
        loop {
            let peer = tokio::select! {
                _ = self.token.cancelled() => break,
                peer = peers.next() => match peer {
                    Some(peer) => peer,
                    None => break,
                },
            };
            if peer.id == local {
                continue;
            }
            let Some(_reservation) = self.in_flight.reserve(peer.id) else {
                debug!("{}: peer {} already being connected", self.source, peer.id);
                continue;
            };

            let result = tokio::select! {
                _ = self.token.cancelled() => break,
                result = tokio::time::timeout(self.connect_timeout, self.connector.connect(&peer)) => {
                    result.unwrap_or(Err(TransportError::Timeout(self.connect_timeout)))
                }
            };
            match result {
                Ok(()) => self.sink.emit(&Observation::PeerConnected {
                    peer: peer.id,
                    source: self.source,
                }),
                Err(e) => debug!("failed to connect to peer {}: {e}", peer.id),
            }
        }
        debug!("{} consumer stopped", self.source);
    }
}
