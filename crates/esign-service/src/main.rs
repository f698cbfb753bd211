//! esignd - contract signing service
//!
//! Serves the signing session API, drains the notification outbox and periodically
//! reconciles contract state transitions that failed after signing.

use anyhow::Context;
use clap::Parser;
use esign_service::config::ServiceConfig;
use esign_service::{build_router, ServiceState};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "esignd")]
#[command(about = "Contract signing service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ESIGN_CONFIG")]
    config: Option<String>,

    /// Listen address, overrides the configuration file
    #[arg(short, long, env = "ESIGN_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level, overrides the configuration file
    #[arg(long, env = "ESIGN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "ESIGN_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ServiceConfig::load(cli.config.as_deref())
        .with_context(|| format!("loading configuration {:?}", cli.config))?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    if let Some(listen) = cli.listen.as_deref() {
        config.server.listen_addr = listen
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid listen address {listen}"))?;
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());
    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let state = ServiceState::bootstrap(&config)
        .await
        .context("bootstrapping signing service")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = state.dispatcher.clone().spawn(shutdown_rx.clone());
    let reconciler = state.spawn_reconciler(shutdown_rx);

    let addr = config.server.listen_addr;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, version = env!("CARGO_PKG_VERSION"), "esignd listening");

    let app = build_router(state);
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    tracing::info!("esignd shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(err) = dispatcher.await {
        tracing::warn!(error = %err, "outbox dispatcher did not stop cleanly");
    }
    if let Some(reconciler) = reconciler {
        if let Err(err) = reconciler.await {
            tracing::warn!(error = %err, "state sync reconciler did not stop cleanly");
        }
    }

    served.context("http server failed")
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("received terminate signal, initiating graceful shutdown");
        }
    }
}
