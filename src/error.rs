//! Error types shared across the node, discovery and chat layers.

use std::time::Duration;

/// Failures reported by the transport capability.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("transport startup failed: {0}")]
    Startup(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("routing query failed: {0}")]
    Query(String),
    #[error("{0} is disabled on this host")]
    Disabled(&'static str),
    #[error("transport channel closed")]
    ChannelClosed,
}

impl TransportError {
    /// The transport is gone for good; callers should stop polling it.
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::ChannelClosed)
    }
}

/// Errors surfaced by discovery strategies and the coordinator.
#[derive(thiserror::Error, Debug)]
pub enum DiscoveryError {
    #[error("strategy {strategy} failed to start: {source}")]
    StrategyStart {
        strategy: &'static str,
        #[source]
        source: TransportError,
    },
    #[error("{0} has not been started")]
    NotStarted(&'static str),
    #[error("{0} is already running")]
    AlreadyStarted(&'static str),
    #[error("{0} has been stopped")]
    Stopped(&'static str),
}

/// Errors surfaced by a chat session.
#[derive(thiserror::Error, Debug)]
pub enum ChatError {
    #[error("failed to join room {room}: {source}")]
    Join {
        room: String,
        #[source]
        source: TransportError,
    },
    #[error("session closed")]
    SessionClosed,
    #[error("message encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Errors surfaced while building or running a node.
#[derive(thiserror::Error, Debug)]
pub enum NodeError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("chat error: {0}")]
    Chat(#[from] ChatError),
    #[error("configuration error: {0}")]
    Config(String),
}
