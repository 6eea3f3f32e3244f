mod bootstrap;
mod routes;

use anyhow::Result;
use tracing::{info, warn};

use cloudpilot_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use cloudpilot_core::config::LogFormat::*;
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
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    bootstrap::spawn_session_eviction(&app.runtime, app.config.session.idle_timeout_secs);

    let state = routes::AppState { runtime: app.runtime, providers: app.providers };
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.server.started",
        bind_address = %address,
        "cloudpilot-server listening"
    );

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal(app.config.server.graceful_shutdown_secs))
        .await?;

    info!(event_name = "system.server.stopped", "cloudpilot-server stopped");
    Ok(())
}

async fn shutdown_signal(grace_secs: u64) {
    let _ = tokio::signal::ctrl_c().await;
    info!(
        event_name = "system.server.stopping",
        grace_secs,
        "shutdown signal received, draining connections"
    );

    // In-flight requests get a bounded drain window after the signal.
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(grace_secs)).await;
        warn!(event_name = "system.server.forced_exit", "drain budget exceeded, exiting");
        std::process::exit(1);
    });
}
