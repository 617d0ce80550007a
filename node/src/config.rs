//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};

use lattice_types::{params, NetworkAddress, NodeId, OverlayError};

/// Configuration for a lattice node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). Every field has a default, so
/// a partial file only overrides what it names.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's identifier. `None` means pick a random non-zero id at
    /// startup.
    #[serde(default)]
    pub node_id: Option<u64>,

    /// Host to advertise to peers.
    #[serde(default = "default_host")]
    pub listen_host: String,

    /// Port to advertise to peers.
    #[serde(default = "default_port")]
    pub listen_port: u16,

    /// Hard cap on the local peer roster.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,

    /// Seconds between heartbeats to each peer.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Liveness deadline after which a peer is a failure candidate.
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,

    /// Data-exchange chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Per-reliable-message resend interval in seconds.
    #[serde(default = "default_retry_timeout")]
    pub retry_timeout_secs: u64,

    /// Reliable message attempts before failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Bootstrap addresses (`"host:port"`) tried in order at startup.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to keep Prometheus metrics.
    #[serde(default)]
    pub enable_metrics: bool,
}

// ── Serde default helpers ───────────────────────────────────────────────

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    params::DEFAULT_PORT
}

fn default_max_peers() -> usize {
    params::MAX_PEERS
}

fn default_heartbeat_interval() -> u64 {
    params::HEARTBEAT_INTERVAL_SECS
}

fn default_node_timeout() -> u64 {
    params::NODE_TIMEOUT_SECS
}

fn default_chunk_size() -> usize {
    params::DEFAULT_CHUNK_SIZE
}

fn default_retry_timeout() -> u64 {
    params::RETRY_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    params::MAX_RETRIES
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ────────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, OverlayError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OverlayError::InvalidArgument(format!("config {path}: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, OverlayError> {
        toml::from_str(s).map_err(|e| OverlayError::InvalidArgument(format!("config: {e}")))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("NodeConfig is always serializable to TOML")
    }

    /// The address this node advertises.
    pub fn listen_address(&self) -> NetworkAddress {
        NetworkAddress::new(self.listen_host.clone(), self.listen_port)
    }

    /// The configured node id, or a fresh random non-zero one.
    pub fn resolve_node_id(&self) -> NodeId {
        match self.node_id {
            Some(raw) if raw != 0 => NodeId::new(raw),
            _ => loop {
                let raw = rand::random::<u64>();
                if raw != 0 {
                    break NodeId::new(raw);
                }
            },
        }
    }

    /// Parse the bootstrap list, skipping (and logging) malformed entries.
    pub fn bootstrap_addresses(&self) -> Vec<NetworkAddress> {
        self.bootstrap_peers
            .iter()
            .filter_map(|raw| match raw.parse::<NetworkAddress>() {
                Ok(address) => Some(address),
                Err(e) => {
                    tracing::warn!(entry = %raw, error = %e, "skipping bad bootstrap entry");
                    None
                }
            })
            .collect()
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            listen_host: default_host(),
            listen_port: default_port(),
            max_peers: default_max_peers(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            node_timeout_secs: default_node_timeout(),
            chunk_size: default_chunk_size(),
            retry_timeout_secs: default_retry_timeout(),
            max_retries: default_max_retries(),
            bootstrap_peers: Vec::new(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            enable_metrics: false,
        }
    }
}
