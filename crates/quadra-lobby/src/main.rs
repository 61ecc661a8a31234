//! Quadra lobby binary: loads configuration, sets up logging, and runs the
//! service until SIGINT or the registry connection is lost.

use anyhow::Result;
use quadra_lobby::{Lobby, LobbyConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = LobbyConfig::load()?;

    let env_filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("quadra lobby starting");
    info!("bind address: {}", config.options.bind);
    info!("registry: {}", config.options.registry_addr);
    info!(
        "game ports: {}-{}",
        config.options.game_port_min, config.options.game_port_max
    );

    let lobby = Lobby::bind(config.options).await?;
    lobby
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    info!("lobby stopped");
    Ok(())
}
