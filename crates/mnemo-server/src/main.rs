//! mnemo-server - Mnemo memory server
//!
//! REST API over the memory orchestrator.

use std::sync::Arc;

use mnemo_sdk::MemoryOrchestrator;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod routes;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("mnemo_server=info".parse()?)
                .add_directive("mnemo_sdk=info".parse()?)
                .add_directive("mnemo_core=info".parse()?),
        )
        .init();

    info!("mnemo-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = config::Config::load()?;
    let memory_config = config.memory_config()?;
    info!(dir = %config.mnemo_dir.display(), "Config loaded");

    let memory = Arc::new(MemoryOrchestrator::open(memory_config).await?);

    let app = routes::create_router(Arc::new(AppState::new(Arc::clone(&memory))));
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "Server ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    info!("Shutting down...");
    memory.shutdown().await;

    Ok(())
}
