//! Burrow simulation driver
//!
//! Builds a line of nodes, lets them bootstrap and merge into one network,
//! then prints the final state as JSON.

use burrow_sim::{SimConfig, SimNet};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "burrow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SimConfig::from_env()?;
    tracing::info!(
        nodes = config.nodes,
        levels = config.levels,
        gsize = config.gsize,
        seed = config.seed,
        "starting simulation"
    );

    let net = SimNet::new(config)?;
    for _ in 0..net.config().nodes {
        net.add_node()?;
    }
    net.link_line();
    net.bootstrap_all().await;

    for round in 0..net.config().rounds {
        net.scan_all().await;
        net.settle().await;
        let changes = net.sync_maps().await;
        net.communicating_vessels(changes).await;
        net.settle().await;
        tracing::info!(round, moved = net.collision_rehooks(), "round done");
    }
    net.scan_all().await;

    let summary = net.summary().await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
