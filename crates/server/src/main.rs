mod analytics;
mod bootstrap;
mod chat;
mod errors;
mod health;
mod prompts;
mod tenancy;
mod tenants;
mod tools_impl;

use anyhow::Result;
use funnelbot_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use funnelbot_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let state = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &state.config.server.bind_address,
        state.config.server.health_check_port,
        state.db_pool.clone(),
    )
    .await?;

    let address =
        format!("{}:{}", state.config.server.bind_address, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        bind_address = %address,
        multi_tenant = state.config.tenancy.multi_tenant_enabled,
        default_tenant = %state.config.tenancy.default_tenant_slug,
        "funnelbot-server started"
    );

    let router = bootstrap::router(state);
    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!("funnelbot-server stopping");
    Ok(())
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
