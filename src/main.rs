use std::sync::Arc;

use anyhow::Context;

use activity_engine::config::{self, EngineConfig};
use activity_engine::engine::Engine;
use activity_engine::service::{GoApiClient, JobService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::from_env().context("Failed to load configuration")?;

    // Initialize tracing; RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    let token = config::token_from_env().context("GoAPI token is required")?;

    eprintln!("Activity engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Max tasks: {}", config.max_tasks);
    eprintln!("   Consumers: {}", config.consumers);
    eprintln!("   Prompts: {}", config.task.prompts.len());
    eprintln!("   Process mode: {}\n", config.goapi.process_mode);

    let service: Arc<dyn JobService> =
        Arc::new(GoApiClient::new(&config.goapi, token).context("Failed to build GoAPI client")?);
    let engine = Arc::new(Engine::from_config(&config, service));

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {e}");
            return;
        }
        tracing::info!("Shutdown requested");
        cancel.cancel();
    });

    engine.run().await;
    Ok(())
}
