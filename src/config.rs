//! Immutable configuration values handed to the node at construction time.
//!
//! Nothing in here parses flags or environment variables; the binary does
//! that and fills these structs in.

use std::time::Duration;

/// Tag under which chat peers announce themselves.
pub const DEFAULT_SERVICE_TAG: &str = "pubsub-chat-example";

/// Number of messages buffered in each direction of a chat session.
pub const CHAT_ROOM_BUF_SIZE: usize = 128;

/// Public libp2p/IPFS bootstrap nodes used to enter the routing overlay.
pub const DEFAULT_BOOTSTRAP_NODES: &[&str] = &[
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmQCU2EcMqAqQPR2i9bChDtGNJchTbq5TbXJJ16u19uLTa",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmbLHAnMoJPWSCR5Zhtx6BHJX9KiKNN6tpvbUcqanj75Nb",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmcZf59bWwK5XFi76CZX8cbJ4BhTzzA3gU1ZjYZcYW3dwt",
    "/ip4/104.131.131.82/tcp/4001/p2p/QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ",
];

/// Settings shared read-only by every discovery strategy and the coordinator.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Identifies peers of this application.
    pub service_tag: String,
    /// Pause between routing-overlay polls, and after a failed poll.
    pub retry_timeout: Duration,
    /// Capacity of every per-strategy peer queue.
    pub max_peers: usize,
    /// Connection attempts made per announced peer before giving up. Zero
    /// disables connecting to announced peers.
    pub max_connect_retries: u32,
    /// Unit of the linear backoff between connection attempts.
    pub retry_backoff: Duration,
    /// Upper bound on a single connection attempt.
    pub connect_timeout: Duration,
    /// How often the routing overlay advertisement is refreshed.
    pub readvertise_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_tag: DEFAULT_SERVICE_TAG.to_string(),
            retry_timeout: Duration::from_secs(10),
            max_peers: 10,
            max_connect_retries: 3,
            retry_backoff: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            readvertise_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl DiscoveryConfig {
    pub fn with_service_tag(mut self, tag: impl Into<String>) -> Self {
        self.service_tag = tag.into();
        self
    }

    pub fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = timeout;
        self
    }

    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    pub fn with_connect_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.max_connect_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Transport and lifecycle settings for a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen_addresses: Vec<String>,
    pub bootstrap_nodes: Vec<String>,
    pub enable_mdns: bool,
    pub enable_dht: bool,
    /// Telemetry sampling period.
    pub stats_interval: Duration,
    pub discovery: DiscoveryConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addresses: vec!["/ip4/0.0.0.0/tcp/0".to_string()],
            bootstrap_nodes: DEFAULT_BOOTSTRAP_NODES
                .iter()
                .map(|addr| addr.to_string())
                .collect(),
            enable_mdns: true,
            enable_dht: true,
            stats_interval: Duration::from_secs(3),
            discovery: DiscoveryConfig::default(),
        }
    }
}

/// User-facing chat settings.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub nickname: String,
    pub room: String,
    pub log_level: String,
}

impl ChatConfig {
    pub fn new(nickname: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            room: room.into(),
            log_level: "info".to_string(),
        }
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}
