//! Structured logging bootstrap.

use tracing_subscriber::EnvFilter;

use crate::{config::Config, error::Result};

/// Initialize `tracing` with a JSON formatter and an env-filter seeded from
/// `config.service.log_level`.
pub fn init_tracing(config: &Config) -> Result<()> {
    let log_level = config.service.log_level.clone();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .ok();

    tracing::info!(service = %config.service.name, "tracing initialized");

    Ok(())
}
