//! Command line interface: headless operator mode over a DHT/transfer
//! node — start a node, publish and fetch files, inspect peers/health, and
//! manage hosting agreements.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "chiral", about = "Decentralized peer-to-peer file-sharing node")]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a DHT/transfer node.
    Node {
        #[command(subcommand)]
        action: NodeCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum NodeCommands {
    /// Start the node: Kademlia overlay, NAT traversal, transfer engine.
    Start {
        /// Port to listen on (0 for an ephemeral port).
        #[arg(long, default_value = "0")]
        port: u16,
        /// Comma-separated bootstrap multiaddresses.
        #[arg(long, value_delimiter = ',')]
        bootstrap: Vec<String>,
    },
    /// Publish a local file and print its fingerprint.
    Publish {
        /// Path to the file to publish.
        path: PathBuf,
    },
    /// Download a file by fingerprint.
    Get {
        /// The fingerprint to fetch.
        fingerprint: String,
        /// Output path for the downloaded file.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List known peers.
    Peers,
    /// Print Kademlia overlay and NAT health.
    Health,
    /// Hosting agreement operations.
    Agreements {
        #[command(subcommand)]
        action: AgreementCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum AgreementCommands {
    /// List known agreements.
    List,
    /// Propose a new hosting agreement to a host peer.
    Propose {
        host_peer_id: String,
        fingerprint: String,
        #[arg(long)]
        duration_days: u64,
        #[arg(long)]
        unit_price_per_mib_per_day: u64,
    },
    /// Accept a proposed agreement (host side).
    Accept { agreement_id: String },
    /// Reject a proposed agreement (host side).
    Reject { agreement_id: String },
    /// Request cancellation of an active agreement.
    Cancel { agreement_id: String },
}
