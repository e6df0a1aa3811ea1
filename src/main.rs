use std::sync::Arc;
use swift::{Node, NodeConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let config = NodeConfig::load();
    let node = Arc::new(Node::new(config));
    tracing::info!("node '{}' starting", node.hostname());

    node.start().await
}
