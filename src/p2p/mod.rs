//! Networking side of the node.
//!
//! ```text
//!            ┌──────────────┐
//!            │     Node     │
//!            └──┬────────┬──┘
//!               │        │
//!    ┌──────────▼──┐  ┌──▼────────┐
//!    │ Discovery   │  │ Telemetry │
//!    │ Coordinator │  └──┬────────┘
//!    └──┬───────┬──┘     │
//!       │       │        │
//!   ┌───▼──┐ ┌──▼──┐     │
//!   │ DHT  │ │mDNS │     │
//!   └───┬──┘ └──┬──┘     │
//!       │       │        │
//!    ┌──▼───────▼────────▼──┐
//!    │   transport (Host)   │
//!    └──────────────────────┘
//! ```
//!
//! Everything above the transport talks to it through the traits in
//! [`transport`]; [`libp2p_network::Libp2pHost`] is the real implementation.

pub mod bandwidth;
pub mod discovery;
pub mod libp2p_network;
pub mod node;
pub mod telemetry;
pub mod transport;

pub use bandwidth::{BandwidthCounter, BandwidthStats};
pub use discovery::{DiscoveryCoordinator, PeerDiscovery, PeerStream};
pub use libp2p_network::Libp2pHost;
pub use node::Node;
pub use telemetry::{NodeStats, Telemetry};
pub use transport::{DiscoverySource, Host, PeerRecord};
