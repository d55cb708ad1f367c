//! Peer discovery strategies and the coordinator that drives them.
//!
//! A strategy announces the local node and yields the peers it finds as a
//! [`PeerStream`]. The [`DiscoveryCoordinator`] starts every strategy under
//! one cancellation scope and dials whatever they produce.

mod coordinator;
mod dht;
mod mdns;
mod retry;

pub use coordinator::DiscoveryCoordinator;
pub use dht::RoutedNetworkDiscovery;
pub use mdns::LocalNetworkDiscovery;
pub use retry::{connect_with_retry, ConnectionAttempt, RetryOutcome};

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::transport::PeerRecord;
use crate::error::DiscoveryError;

/// Lazily produced peers; ends when either token passed to or owned by the
/// strategy is cancelled.
pub type PeerStream = Pin<Box<dyn Stream<Item = PeerRecord> + Send>>;

#[async_trait]
pub trait PeerDiscovery: Send + Sync {
    fn name(&self) -> &'static str;

    /// Begins announcing/listening. Failure here is fatal for this strategy.
    async fn start(&self, token: &CancellationToken) -> Result<(), DiscoveryError>;

    /// Halts the strategy and waits for its tasks to exit.
    async fn stop(&self) -> Result<(), DiscoveryError>;

    /// Each call yields a fresh stream tied to `token` and the strategy's lifetime.
    fn discover_peers(&self, token: CancellationToken) -> Result<PeerStream, DiscoveryError>;
}

/// Start/stop bookkeeping shared by the strategies.
#[derive(Default)]
struct Lifetime {
    token: Mutex<Option<CancellationToken>>,
    tracker: TaskTracker,
}

impl Lifetime {
    fn begin(
        &self,
        parent: &CancellationToken,
        name: &'static str,
    ) -> Result<CancellationToken, DiscoveryError> {
        let mut slot = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|t| !t.is_cancelled()) {
            return Err(DiscoveryError::AlreadyStarted(name));
        }
        let token = parent.child_token();
        *slot = Some(token.clone());
        Ok(token)
    }

    fn current(&self, name: &'static str) -> Result<CancellationToken, DiscoveryError> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|t| !t.is_cancelled())
            .cloned()
            .ok_or(DiscoveryError::NotStarted(name))
    }

    fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Cancels without waiting; used when `start` fails half-way.
    fn abort(&self) {
        if let Some(token) = self
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }

    async fn end(&self) {
        self.abort();
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
