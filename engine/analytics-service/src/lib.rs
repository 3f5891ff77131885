//! Storefront Analytics Service Library
//!
//! Configuration loading, logging setup, signal handling and the wiring that
//! runs a `StreamProcessor` against a JSON-lines event source.

use anyhow::{Context, Result};
use std::path::Path;

pub mod cli;
pub mod config;
pub mod logging;
pub mod service;
pub mod signals;

pub use cli::Cli;
pub use config::{Overrides, ServiceConfig};
pub use logging::initialize_logging;
pub use service::ServiceState;
pub use signals::{setup_signal_handlers, ShutdownSignal};

/// Load configuration from an optional file, the environment and CLI overrides
pub fn load_configuration(path: Option<&Path>, overrides: &Overrides) -> Result<ServiceConfig> {
    config::load_config(path, overrides).context("Failed to load service configuration")
}
