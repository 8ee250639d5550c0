use anyhow::Result;
use ucg_gateway::{GatewayConfig, run};

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::from_env()?;
    ucg_telemetry::install(&config.service_name)?;
    run(config).await
}
