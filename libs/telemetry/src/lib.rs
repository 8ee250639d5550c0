//! Logging bootstrap shared by the gateway binaries.

use anyhow::Result;

mod config;
mod tracing_init;

pub use config::{DEFAULT_FILTER, TelemetryConfig};
pub use tracing_init::init_tracing;

/// Installs the process subscriber configured from `RUST_LOG` and `LOG_FORMAT`.
pub fn install(service_name: &str) -> Result<()> {
    init_tracing(&TelemetryConfig::from_env(service_name))
}
