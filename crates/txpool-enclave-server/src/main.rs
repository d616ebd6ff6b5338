use clap::Parser;
use tracing::info;

use txpool_enclave_server::config::NodeConfig;
use txpool_enclave_server::node::Node;
use txpool_enclave_server::server::init_tracing;

#[tokio::main]
async fn main() {
    if std::env::var_os("RUST_BACKTRACE").is_none() {
        std::env::set_var("RUST_BACKTRACE", "1");
    }
    init_tracing();

    let config = NodeConfig::parse();
    info!("Trusted pool node starting on {}:{}", config.ip, config.port);

    let handle = Node::new(config).start().await.unwrap();
    handle.stopped().await;
}
