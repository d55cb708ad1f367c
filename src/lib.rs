//! Serverless peer-to-peer chat rooms.
//!
//! A [`Node`] finds other participants through mDNS on the local network
//! and through the Kademlia DHT, connects to them, and joins rooms that are
//! carried over gossipsub. Each joined room is a [`ChatRoom`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshchat::{ChatConfig, ConsoleSink, Node, NodeConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), meshchat::NodeError> {
//! let root = CancellationToken::new();
//! let node = Node::new(&NodeConfig::default(), &root, Arc::new(ConsoleSink)).await?;
//! let room = node.join_room(&ChatConfig::new("alice", "general")).await?;
//! node.start().await?;
//!
//! room.publish("hi").await?;
//! while let Some(msg) = room.next_message().await {
//!     println!("{}: {}", msg.sender_nick, msg.message);
//! }
//!
//! root.cancel();
//! node.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod config;
pub mod error;
pub mod p2p;
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;

pub use chat::{ChatMessage, ChatRoom, SessionState};
pub use config::{ChatConfig, DiscoveryConfig, NodeConfig};
pub use error::{ChatError, DiscoveryError, NodeError, TransportError};
pub use p2p::Node;
pub use sink::{CompositeSink, ConsoleSink, EventSink, NullSink, Observation, SharedSink, WriterSink};
