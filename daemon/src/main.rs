//! lattice daemon — runs an in-process overlay mesh from the CLI.
//!
//! The overlay core is transport-agnostic; this binary wires a set of
//! nodes over the in-memory fabric, bootstraps them against the first
//! node, and reports overlay health until a shutdown signal arrives.

use std::sync::Arc;

use clap::Parser;
use lattice_net::{MemoryHub, Transport};
use lattice_node::{init_logging, LogFormat, NodeConfig, OverlayEvent, OverlayNode};
use lattice_types::NodeId;

#[derive(Parser)]
#[command(name = "lattice-daemon", about = "lattice overlay mesh daemon")]
struct Cli {
    /// Number of nodes to run in this process.
    #[arg(long, default_value_t = 3, env = "LATTICE_NODES")]
    nodes: u64,

    /// First node id; the rest count up from it.
    #[arg(long, default_value_t = 1, env = "LATTICE_BASE_ID")]
    base_id: u64,

    /// First advertised port; the rest count up from it.
    #[arg(long, env = "LATTICE_BASE_PORT")]
    base_port: Option<u16>,

    /// Maximum peers per node.
    #[arg(long, env = "LATTICE_MAX_PEERS")]
    max_peers: Option<usize>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, default_value = "info", env = "LATTICE_LOG_LEVEL")]
    log_level: String,

    /// Log format: "human" or "json".
    #[arg(long, default_value = "human", env = "LATTICE_LOG_FORMAT")]
    log_format: String,

    /// Path to a TOML configuration file. If provided, file settings are
    /// the base for every node; CLI flags override them.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(LogFormat::from_config(&cli.log_format), &cli.log_level);

    let base_config = match &cli.config {
        Some(path) => match NodeConfig::from_toml_file(path) {
            Ok(config) => {
                tracing::info!(path = %path, "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "config file unusable, using defaults");
                NodeConfig::default()
            }
        },
        None => NodeConfig::default(),
    };

    let base_port = cli.base_port.unwrap_or(base_config.listen_port);
    let max_peers = cli.max_peers.unwrap_or(base_config.max_peers);
    anyhow::ensure!(cli.nodes >= 1, "need at least one node");

    let hub = MemoryHub::new();
    let mut nodes: Vec<Arc<OverlayNode>> = Vec::with_capacity(cli.nodes as usize);

    for index in 0..cli.nodes {
        let id = cli.base_id + index;
        let port = base_port + index as u16;
        let mut config = base_config.clone();
        config.node_id = Some(id);
        config.listen_port = port;
        config.max_peers = max_peers;
        // Everyone after the first bootstraps against the first.
        config.bootstrap_peers = if index == 0 {
            Vec::new()
        } else {
            vec![format!("{}:{}", config.listen_host, base_port)]
        };

        let endpoint = hub.attach(NodeId::new(id), config.listen_address());
        let node = OverlayNode::new(config, Arc::clone(&endpoint) as Arc<dyn Transport>);

        node.events().subscribe(|event| match event {
            OverlayEvent::NodeAdded { id, address } => {
                tracing::info!(node = %id, %address, "overlay event: node added");
            }
            OverlayEvent::NodeFailed { id } => {
                tracing::warn!(node = %id, "overlay event: node failed");
            }
            OverlayEvent::NetworkRepaired => {
                tracing::info!("overlay event: network repaired");
            }
            _ => {}
        });

        let sink = Arc::clone(&node);
        hub.set_handler(NodeId::new(id), move |message| sink.handle_message(message));
        nodes.push(node);
    }

    for node in &nodes {
        node.start().await;
    }

    let first = &nodes[0];
    tracing::info!(
        nodes = nodes.len(),
        connected = first.is_topology_connected(),
        "mesh is up; press ctrl-c to stop"
    );

    first.wait_for_shutdown().await;

    for node in &nodes {
        node.leave_network();
        node.stop().await;
        tracing::info!(
            id = %node.id(),
            peers = node.local().peer_count(),
            routed = node.route_stats().routed(),
            delivery_rate = node.delivery_rate(),
            "node stopped"
        );
    }

    tracing::info!("lattice daemon exited cleanly");
    Ok(())
}
