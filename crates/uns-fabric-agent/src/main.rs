//! # UNS Fabric Agent
//!
//! Runtime binary for the unified namespace fabric. Hosts a broker backend
//! (embedded MQTT or external Kafka) behind the admission pipeline:
//!
//! 1. **Topic validation**: ISA-95 path rules with configurable root namespace
//! 2. **Security**: authentication, topic-level authorization, audit trail
//! 3. **Schema validation**: JSON Schema enforcement per topic pattern
//!
//! Security tables reload on SIGHUP without dropping live sessions.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod runtime;

pub use config::AgentConfig;
pub use runtime::Fabric;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting UNS Fabric agent"
    );

    // Load configuration
    let config = AgentConfig::from_env()?;

    tracing::info!(broker = %config.broker, "Configuration loaded");

    let fabric = Fabric::new(config);

    // Run until shutdown
    fabric.run().await?;

    Ok(())
}
