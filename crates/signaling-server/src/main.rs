//! Signaling server binary.
//!
//! Startup flow:
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Spawn the room registry actor
//! 4. Serve `/ws` plus health endpoints on one listener
//! 5. On SIGINT/SIGTERM: flip readiness off, drain the registry, exit

use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use signaling_server::actors::RegistryActor;
use signaling_server::config::Config;
use signaling_server::observability::{health_router, HealthState};
use signaling_server::ws::{ws_handler, AppState};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "signaling_server=debug,tower_http=info,axum=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        bind_address = %config.bind_address,
        liveness_timeout_seconds = config.liveness_timeout_seconds,
        disconnect_grace_seconds = config.disconnect_grace_seconds,
        "Starting signaling server"
    );

    let (registry, registry_task) = RegistryActor::spawn(&config);
    let health_state = Arc::new(HealthState::new());

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(AppState {
            registry: registry.clone(),
        })
        .merge(health_router(health_state.clone()))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    info!(bind_address = %config.bind_address, "Listening");

    health_state.set_ready();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Listener is closed; drain the actor system before exit
    health_state.set_not_ready();
    info!("Shutdown signal received, draining rooms");

    if let Err(e) = registry.shutdown().await {
        warn!(error = %e, "Registry shutdown reported an error");
    }
    if let Err(e) = registry_task.await {
        warn!(error = %e, "Registry task join failed");
    }

    info!("Signaling server stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
