mod config;
mod connection;
mod handlers;
mod protocol;
mod state;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use runq_config::{LogFormat, LoggingConfig};
use runq_engine::Engine;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Args;
use state::DaemonState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();
    let config = args.load().context("failed to load configuration")?;

    init_logging(&config.logging);

    runq_config::validate_daemon(&config.daemon)?;
    let token = if config.daemon.require_auth() {
        config.daemon.token.clone()
    } else {
        warn!("Auth disabled (insecure_no_auth). Do not use in production!");
        None
    };

    let engine = Engine::start(config.engine.clone());
    info!(
        "Engine started: max_concurrent_jobs={} max_job_duration_secs={}",
        config.engine.max_concurrent_jobs, config.engine.max_job_duration_secs
    );

    // Create shared state
    let state = Arc::new(DaemonState::new(token, engine.clone()));

    // Bind TCP listener
    let listener = TcpListener::bind(&config.daemon.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.daemon.listen))?;
    info!("Listening on {}", config.daemon.listen);

    // Accept loop
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = state.clone();
                    tokio::spawn(async move {
                        connection::handle_client(stream, addr.to_string(), state).await;
                    });
                }
                Err(e) => {
                    error!("Accept error: {e}");
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
