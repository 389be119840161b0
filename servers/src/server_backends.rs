//! # Backends Relay Server
//!
//! Discovers the backend data services listed in its configuration, keeps a
//! registry of the ones that answer, and tells connected UI clients about
//! every backend that appears or disappears. Clients connect over SockJS or
//! a raw WebSocket and speak a small STOMP subset; the REST endpoints expose
//! the current listing and proxy data requests to the chosen backend.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use lib_common::discovery::{DiscoveryLoop, HttpResolver, Registry};
use lib_common::messaging::{Broadcaster, SessionManager};
use lib_common::retrieve::BackendClient;
use lib_common::web::{self, AppState};

mod relay_logic;
use relay_logic::{config, logger};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Phase 0: Environment ---
    let dotenv_path = dotenvy::dotenv().ok();

    // --- Phase 1: Configuration ---
    let (config, config_file) = config::load_config()?;
    let settings = config.settings()?;

    // --- Phase 2: Logging ---
    let _log_guard = logger::setup_logging(&settings.log_dir, &settings.log_level, settings.log_json)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_file = ?config_file,
        dotenv = ?dotenv_path,
        "Backends relay starting"
    );
    info!(
        source = ?settings.source,
        interval_secs = settings.discovery_interval.as_secs(),
        resolve_timeout_secs = settings.resolve_timeout.as_secs(),
        "Discovery configured"
    );

    // --- Phase 3: Core Infrastructure ---
    let registry = Registry::new();
    let sessions = Arc::new(SessionManager::new(settings.outbound_queue, settings.max_frame_bytes));
    let broadcaster = Arc::new(Broadcaster::new(sessions.clone()));
    let resolve_client = BackendClient::new(settings.resolve_timeout)?;
    let proxy_client = BackendClient::new(settings.proxy_timeout)?;

    // --- Phase 4: Discovery ---
    let shutdown = CancellationToken::new();
    let discovery = DiscoveryLoop::new(
        settings.backend_source(),
        Arc::new(HttpResolver::new(resolve_client)),
        registry.clone(),
        broadcaster,
    )
    .with_interval(settings.discovery_interval);
    let discovery_handle = tokio::spawn(discovery.run(shutdown.clone()));

    // --- Phase 5: HTTP Server ---
    let state = Arc::new(AppState {
        registry,
        sessions: sessions.clone(),
        client: proxy_client,
        settings: settings.web.clone(),
    });
    let app = web::router(state);

    let listener = TcpListener::bind((settings.host.as_str(), settings.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", settings.host, settings.port))?;
    info!(address = %listener.local_addr()?, "Relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone(), sessions.clone()))
        .await?;

    // --- Phase 6: Teardown ---
    shutdown.cancel();
    if let Err(e) = discovery_handle.await {
        error!(error = %e, "Discovery task ended abnormally");
    }

    info!("Shutdown complete.");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM, after stopping discovery and closing every
/// client session.
async fn shutdown_signal(shutdown: CancellationToken, sessions: Arc<SessionManager>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, initiating shutdown."),
        _ = terminate => info!("SIGTERM received, initiating shutdown."),
    }

    shutdown.cancel();
    sessions.close_all();
}
