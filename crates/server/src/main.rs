mod bootstrap;
mod health;

use std::time::Duration;

use anyhow::Result;
use steamguard_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use steamguard_core::config::LogFormat::*;
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
    // Config first: a missing token must stop the process before anything connects.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config)?;

    health::spawn(&app.config.server.bind_address, app.config.server.health_check_port, app.link.clone())
        .await?;

    let gateway = app.gateway.clone();
    tokio::spawn(async move {
        let exit = gateway.start().await;
        tracing::info!(
            event_name = "system.server.gateway_exit",
            correlation_id = "runtime",
            exit = ?exit,
            "gateway runner finished"
        );
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bot_id = %app.identity,
        "steamguard-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        bot_id = %app.identity,
        "steamguard-server stopping"
    );

    app.link.shutdown();
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, app.link.closed()).await.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "dashboard link did not close within the grace period"
        );
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
