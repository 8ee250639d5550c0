//! HTTP surface of the unified communication gateway.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod read;
pub mod reqid;
pub mod state;
pub mod webhook;

use std::sync::Arc;

use anyhow::Result;
use axum::serve;
use tokio::net::TcpListener;
use tracing::info;

pub use crate::config::GatewayConfig;
pub use crate::http::build_router;
pub use crate::state::AppState;

/// Builds the state from `config` and serves until ctrl-c.
pub async fn run(config: GatewayConfig) -> Result<()> {
    let state = Arc::new(AppState::from_config(&config)?);
    let router = build_router(state);
    let listener = TcpListener::bind(config.bind).await?;
    info!("{} listening on {}", config.service_name, config.bind);

    serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
