//! Taiga bridge server.
//!
//! Serves the MCP streaming transports, the action proxy and the liveness
//! endpoints on one port. Upstream credentials and tuning come from the
//! environment; see `BridgeConfig` and `TaigaConfig`.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use axum::ServiceExt;
use axum::extract::Request;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use taiga_bridge::{AppState, build_app};
use taiga_bridge_core::config::BridgeConfig;
use taiga_bridge_core::idempotency::{IdempotencyCache, IdempotencyConfig};
use taiga_bridge_core::lifecycle::{SessionConfig, SessionManager};
use taiga_bridge_core::ops::TaigaOps;
use taiga_bridge_core::pagination::PagingPolicy;
use taiga_bridge_core::upstream::{TaigaClient, TaigaConfig};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Bind address
    #[arg(short, long, env = "TAIGA_BRIDGE_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The guard flushes buffered log lines on exit; keep it for all of main.
    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = BridgeConfig::from_env();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration, refusing to start");
        std::process::exit(1);
    }
    let taiga_config = TaigaConfig::from_env().unwrap_or_else(|e| {
        error!(error = %e, "Taiga credentials are not configured, refusing to start");
        std::process::exit(1);
    });
    let client = TaigaClient::new(taiga_config).unwrap_or_else(|e| {
        error!(error = %e, "Failed to build Taiga client");
        std::process::exit(1);
    });
    if config.action_api_key.is_none() {
        info!("ACTION_PROXY_API_KEY is not set; /actions requests will be refused");
    }

    let shutdown = CancellationToken::new();

    let idempotency = Arc::new(IdempotencyCache::new(IdempotencyConfig::from_bridge(
        &config,
    )));
    let cleanup = idempotency.spawn_cleanup(shutdown.clone());

    let sessions = Arc::new(SessionManager::new(SessionConfig::from_bridge(&config)));
    if let Err(e) = sessions.start() {
        error!(error = %e, "Session manager failed to start");
        std::process::exit(1);
    }

    let ops = TaigaOps::new(
        Arc::new(client),
        idempotency,
        PagingPolicy::from_bridge(&config),
    );
    let app = build_app(AppState::new(ops, Arc::clone(&sessions), config));

    setup_signal_handlers(shutdown.clone());

    let addr = format!("{}:{}", cli.bind, cli.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(
        addr = %addr,
        version = env!("CARGO_PKG_VERSION"),
        "Taiga bridge listening"
    );

    let server_shutdown = shutdown.clone();
    let server_sessions = Arc::clone(&sessions);
    let served = axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
        .with_graceful_shutdown(async move {
            server_shutdown.cancelled().await;
            // Open event streams only end once their sessions are closed.
            let closed = server_sessions.stop();
            info!(closed_sessions = closed, "Closed streaming sessions");
        })
        .await;

    sessions.stop();
    shutdown.cancel();
    cleanup.abort();
    info!("Taiga bridge stopped");

    served?;
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_sigint = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT, initiating graceful shutdown");
                shutdown_sigint.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGINT"),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating graceful shutdown");
                shutdown.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGTERM"),
        }
    });
}
