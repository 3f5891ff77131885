//! Signal handling for graceful shutdown

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Resolves once Ctrl+C or (on Unix) SIGTERM has been received
pub struct ShutdownSignal {
    receiver: mpsc::Receiver<&'static str>,
}

impl ShutdownSignal {
    /// Wait for the first signal and return its name
    pub async fn recv(&mut self) -> &'static str {
        self.receiver.recv().await.unwrap_or("signal listeners gone")
    }
}

/// Setup signal handlers for graceful shutdown
pub fn setup_signal_handlers() -> Result<ShutdownSignal> {
    let (shutdown_tx, receiver) = mpsc::channel(2);

    // Handle Ctrl+C (SIGINT)
    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C signal: {}", e);
            return;
        }

        info!("Ctrl+C signal received");
        let _ = ctrl_c_tx.send("SIGINT").await;
    });

    // Handle SIGTERM (Unix only)
    #[cfg(unix)]
    {
        use signal_hook::consts::SIGTERM;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let shutdown_flag = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGTERM, shutdown_flag.clone())?;

        tokio::spawn(async move {
            // signal_hook only flips the flag; poll it
            loop {
                if shutdown_flag.load(Ordering::Relaxed) {
                    info!("SIGTERM signal received");
                    let _ = shutdown_tx.send("SIGTERM").await;
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        });
    }

    Ok(ShutdownSignal { receiver })
}
