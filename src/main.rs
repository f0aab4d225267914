use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use space_presence_service::config::Settings;
use space_presence_service::server::{create_app, AppState};
use space_presence_service::tasks::HeartbeatTask;
use space_presence_service::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    init_tracing(&settings.logging)?;
    tracing::info!("Configuration loaded");

    // Create application state
    let state = AppState::new(settings.clone());
    if !state.authenticator.is_enabled() {
        tracing::warn!("JWT secret not configured, every connection will be a guest");
    }
    if !state.credential_issuer.is_configured() {
        tracing::warn!("Relay secret not configured, credential requests will fail");
    }
    let registry = state.registry.clone();
    tracing::info!("Application state initialized");

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Start heartbeat task in background
    let heartbeat_task = HeartbeatTask::new(
        settings.websocket.clone(),
        state.router.clone(),
        shutdown_tx.subscribe(),
    );
    let heartbeat_handle = tokio::spawn(async move {
        heartbeat_task.run().await;
    });

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
        .await?;

    tracing::info!("Waiting for background tasks to finish...");
    let _ = heartbeat_handle.await;

    let stats = registry.stats();
    registry.clear();
    tracing::info!(
        sessions_dropped = stats.total_sessions,
        rooms_dropped = stats.active_rooms,
        "Server shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal_handler(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Stop background tasks
    let _ = shutdown_tx.send(());
}
