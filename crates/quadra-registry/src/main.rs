//! Quadra registry binary: loads configuration, sets up logging, and runs
//! the service until SIGINT. Shutdown rewrites the state snapshot.

use anyhow::Result;
use quadra_registry::{Registry, RegistryConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = RegistryConfig::load()?;

    let env_filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("quadra registry starting");
    info!("bind address: {}", config.bind);
    info!("state file: {}", config.state_file.display());

    let registry = Registry::bind(&config.bind, &config.state_file).await?;
    registry
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    info!("registry stopped");
    Ok(())
}
