//! Registry daemon entrypoint.
//!
//! Startup/shutdown sequencing and the `shutdown_signal` implementation are
//! grounded directly on the gateway binary's `main.rs`: build `AppState`,
//! bind a `TcpListener`, serve with `with_graceful_shutdown`, react to
//! `ctrl_c` and (on unix) `SIGTERM`. Exit codes follow §6's daemon contract.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use mesh_registry::api::{AppState, ReadinessState};
use mesh_registry::config::{RegistryCli, RegistryConfig};
use mesh_registry::events::EventBroadcaster;
use mesh_registry::health;
use mesh_registry::store::Store;
use mesh_registry::trace_sink::TraceSink;

/// Exit codes per §6: 0 clean shutdown, 2 invalid config, 3 store open
/// failure, 4 bind failure, signalled exits are handled by the process
/// itself (>=128) and never returned from `main`.
const EXIT_INVALID_CONFIG: u8 = 2;
const EXIT_STORE_OPEN_FAILURE: u8 = 3;
const EXIT_BIND_FAILURE: u8 = 4;

fn init_logging(cfg: &RegistryConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&cfg.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if cfg.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Opening the store is infallible for the in-memory backend; a file-backed
/// `store_path` would validate/create its directory here and return
/// `EXIT_STORE_OPEN_FAILURE` on failure. No persisted backend exists yet,
/// so this only logs the configured path for operator visibility.
fn open_store(cfg: &RegistryConfig) -> Result<Store, std::io::Error> {
    if let Some(path) = &cfg.store_path {
        info!(store_path = %path, "persisted store path configured, using in-memory store for now");
    }
    Ok(Store::new())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = RegistryCli::parse();
    let cfg = RegistryConfig::resolve(&cli);
    init_logging(&cfg);

    let addr: SocketAddr = match format!("{}:{}", cfg.bind_host, cfg.bind_port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid bind address '{}:{}': {}", cfg.bind_host, cfg.bind_port, e);
            return ExitCode::from(EXIT_INVALID_CONFIG);
        }
    };

    let store = match open_store(&cfg) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("failed to open store: {}", e);
            return ExitCode::from(EXIT_STORE_OPEN_FAILURE);
        }
    };
    let events = Arc::new(EventBroadcaster::new());
    let redis_url = std::env::var("MCP_MESH_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let trace_sink = Arc::new(TraceSink::new(redis_url));
    let readiness = Arc::new(ReadinessState::default());

    let health_store = store.clone();
    let health_events = events.clone();
    tokio::spawn(health::run(health_store, health_events, Duration::from_secs(cfg.health_sweep_interval_s)));

    let state = AppState {
        store,
        events,
        trace_sink,
        readiness: readiness.clone(),
    };
    let router = mesh_registry::api::build_router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {}: {}", addr, e);
            return ExitCode::from(EXIT_BIND_FAILURE);
        }
    };
    readiness.mark_ready();
    info!(%addr, "mesh-registry listening");

    if let Err(e) = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("server error: {}", e);
        return ExitCode::from(EXIT_INVALID_CONFIG);
    }

    info!("mesh-registry shut down cleanly");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
