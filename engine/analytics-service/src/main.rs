//! Storefront Analytics Service
//!
//! Reads storefront events from a JSON-lines stream, keeps live aggregates
//! and flushes snapshots until Ctrl+C or SIGTERM.

use anyhow::{bail, Result};
use clap::Parser;
use tracing::{error, info};

use analytics_service::{
    initialize_logging, load_configuration, setup_signal_handlers, Cli, ServiceState,
};
use stream_processor::LoopExit;

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up a local .env before reading STREAM_ANALYTICS_* variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config = load_configuration(cli.config.as_deref(), &cli.overrides())?;
    initialize_logging(&config.logging)?;

    info!("Starting Storefront Analytics Service v{}", env!("CARGO_PKG_VERSION"));

    let service = ServiceState::new(config)?;
    let mut shutdown_signal = setup_signal_handlers()?;
    let mut loop_handle = service.spawn_processor();

    info!("Stream analytics running. Press Ctrl+C to shut down gracefully.");

    let exited = tokio::select! {
        signal = shutdown_signal.recv() => {
            info!("{} received. Initiating graceful shutdown...", signal);
            None
        }
        exited = &mut loop_handle => Some(exited),
    };

    match exited {
        None => service.shutdown(loop_handle).await?,
        Some(Ok(Ok(LoopExit::Degraded))) => {
            bail!("StreamProcessor could not connect to its event source");
        }
        Some(Ok(Ok(LoopExit::Stopped))) => {
            info!("StreamProcessor loop exited");
            service.report();
        }
        Some(Ok(Err(e))) => error!("StreamProcessor failed: {}", e),
        Some(Err(e)) => error!("StreamProcessor task failed: {}", e),
    }

    info!("Storefront Analytics Service shutdown complete");
    Ok(())
}
