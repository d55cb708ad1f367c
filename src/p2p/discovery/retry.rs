//! Bounded, linearly backed-off connection attempts.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::DiscoveryConfig;
use crate::error::TransportError;
use crate::p2p::transport::{Connector, PeerRecord};

/// Retry state for one announced peer.
#[derive(Debug, Clone)]
pub struct ConnectionAttempt {
    pub target: PeerRecord,
    /// Attempts made so far.
    pub retry_count: u32,
    /// Delay before the next attempt.
    pub next_delay: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl ConnectionAttempt {
    pub fn new(target: PeerRecord, config: &DiscoveryConfig) -> Self {
        Self {
            target,
            retry_count: 0,
            next_delay: Duration::ZERO,
            max_retries: config.max_connect_retries,
            backoff: config.retry_backoff,
        }
    }

    /// Records a failed attempt and returns the wait before the next one,
    /// or `None` once the retry budget is spent.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.retry_count += 1;
        if self.retry_count >= self.max_retries {
            return None;
        }
        self.next_delay = self.backoff * self.retry_count;
        Some(self.next_delay)
    }

    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

#[derive(Debug)]
pub enum RetryOutcome {
    Connected,
    Abandoned {
        attempts: u32,
        error: TransportError,
    },
    /// The retry budget is zero, so no attempt was made.
    Skipped,
    Cancelled,
}

/// Dials `attempt.target` until it connects, the budget runs out or `token` fires.
pub async fn connect_with_retry(
    connector: &dyn Connector,
    mut attempt: ConnectionAttempt,
    connect_timeout: Duration,
    token: &CancellationToken,
) -> RetryOutcome {
    if attempt.is_exhausted() {
        return RetryOutcome::Skipped;
    }
    loop {
        debug!("attempting to connect to peer {}", attempt.target.id);
        let result = tokio::select! {
            _ = token.cancelled() => return RetryOutcome::Cancelled,
            result = tokio::time::timeout(connect_timeout, connector.connect(&attempt.target)) => {
                result.unwrap_or(Err(TransportError::Timeout(connect_timeout)))
            }
        };

        let error = match result {
            Ok(()) => return RetryOutcome::Connected,
            Err(e) => e,
        };
        debug!(
            "connection attempt {} failed for peer {}: {error}",
            attempt.retry_count + 1,
            attempt.target.id
        );

        let Some(delay) = attempt.record_failure() else {
            return RetryOutcome::Abandoned {
                attempts: attempt.retry_count,
                error,
            };
        };
        tokio::select! {
            _ = token.cancelled() => return RetryOutcome::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
