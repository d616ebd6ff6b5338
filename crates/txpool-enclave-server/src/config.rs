use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

use txpool_enclave::{POOL_DEFAULT_ENDPOINT_IP, POOL_DEFAULT_ENDPOINT_PORT};

/// Command line arguments for the trusted pool node
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Enclave-resident trusted transaction pool", long_about = None)]
pub struct NodeConfig {
    /// The ip to bind the server to
    #[arg(long, default_value_t = POOL_DEFAULT_ENDPOINT_IP)]
    pub ip: IpAddr,

    /// The port to bind the server to
    #[arg(long, default_value_t = POOL_DEFAULT_ENDPOINT_PORT)]
    pub port: u16,

    /// Directory holding the node's sealed key file
    #[arg(long, default_value = "trusted-node")]
    pub node_dir: PathBuf,

    /// Peer identifier used during key provisioning; random when omitted
    #[arg(long)]
    pub peer_id: Option<String>,

    /// JSON-RPC endpoint of the external chain service
    #[arg(long)]
    pub chain_endpoint: Option<String>,

    /// Generate a fleet key at startup when none is stored
    #[arg(long)]
    pub generate: bool,

    /// Explicit fleet secret key, hex encoded. Development only
    #[arg(long)]
    pub private_key: Option<String>,

    /// Holder node to provision the fleet key from when none is stored
    #[arg(long)]
    pub holder_url: Option<String>,

    /// Peer identifier the holder node is known by
    #[arg(long, default_value = "holder")]
    pub holder_peer_id: String,

    /// Keystore sealing secret, standing in for hardware sealing
    #[arg(long, default_value = "txpool-dev-sealing-secret")]
    pub sealing_secret: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::parse_from(std::iter::empty::<&str>())
    }
}
