//! Main Entrypoint for the voxbridge Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Building the shared services (relay client, dedup cache, governor).
//! 4. Spawning the connection supervisor and the bridge orchestrator.
//! 5. Registering platform commands behind the quota gate.
//! 6. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use voxbridge_bridge::{
    config::Config,
    orchestrator::Orchestrator,
    router::create_router,
    state::AppState,
    supervisor,
    transport::{Transport, WsTransport},
};
use voxbridge_core::{
    dedup::DedupCache,
    governor::{Decision, OperationClass, RateGovernor},
    history::ConversationStore,
    relay::HttpRelayClient,
};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing bridge services...");

    // --- 3. Build Shared Services ---
    let relay = Arc::new(
        HttpRelayClient::new(&config.backend_url, config.relay_timeout)
            .context("Failed to build relay client")?,
    );
    let dedup = Arc::new(DedupCache::new(config.dedup_capacity));
    let governor = Arc::new(RateGovernor::new(config.quota_policies()));
    let history = Arc::new(ConversationStore::new(config.conversation_window));
    let transport = Arc::new(WsTransport::new(
        config.gateway_url.clone(),
        config.platform_token.clone(),
        config.commands_url.clone(),
    ));

    // --- 4. Spawn the Supervisor and Orchestrator ---
    let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue_depth);
    let (supervisor_handle, _supervisor_task) = supervisor::spawn(
        transport.clone(),
        config.supervisor_settings(),
        inbound_tx.clone(),
    );

    let orchestrator = Orchestrator::new(
        dedup,
        governor.clone(),
        relay,
        history,
        supervisor_handle.clone(),
        config.orchestrator_settings(),
    );
    let _orchestrator_task = orchestrator.spawn(inbound_rx);

    // --- 5. Register Platform Commands (quota-gated) ---
    match governor.allow(OperationClass::CommandRegistration) {
        Decision::Proceed => match transport.register_commands().await {
            Ok(()) => info!("platform commands registered"),
            Err(error) => warn!(%error, "command registration failed, continuing without"),
        },
        Decision::Reject { retry_after } => {
            warn!(?retry_after, "command registration quota exhausted, skipping")
        }
        Decision::Defer(delay) => warn!(?delay, "command registration deferred, skipping"),
    }

    // --- 6. Start Server ---
    let app_state = Arc::new(AppState {
        supervisor: supervisor_handle,
        inbound_tx,
    });
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = create_router(app_state).layer(cors);

    info!(
        bind_address = %config.bind_address,
        backend = %config.backend_url,
        gateway = %config.gateway_url,
        "Bridge configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server has shut down.");
    Ok(())
}
