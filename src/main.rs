mod admin_handler;
mod config;
mod state;
mod time_feed;

use axum::{routing::{get, post}, Router};
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load()?;

    tracing::info!(
        instance_id = %config.server.instance_id,
        feed_interval_ms = config.feed.interval_ms,
        max_age_secs = config.registry.max_age_secs,
        "Time feed starting"
    );

    let state = AppState::new(config.clone());

    let prune_registry = state.registry.clone();
    let prune_cancel = state.shutdown.clone();
    let prune_interval = config.registry.prune_interval();
    let max_age = config.registry.max_age();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(prune_interval);
        loop {
            tokio::select! {
                _ = prune_cancel.cancelled() => {
                    tracing::info!("Prune task cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let pruned = prune_registry.prune_stale(max_age);
                    tracing::debug!(
                        active_connections = prune_registry.count(),
                        pruned,
                        "Connection status"
                    );
                }
            }
        }
    });

    let mut app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ready", get(|| async { "READY" }))
        .route("/time", get(time_feed::time_feed));

    if config.admin.enabled {
        tracing::info!("Admin endpoints enabled under /api");
        app = app
            .route("/api/stats", get(admin_handler::get_stats))
            .route("/api/send", post(admin_handler::send_message))
            .route("/api/prune", post(admin_handler::prune));
    }

    let app = app
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    tracing::info!("Time feed shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM after telling every client and closing
/// their streams, so graceful shutdown is not held open by SSE bodies.
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    state.shutdown.cancel();
    let connections = state.registry.count();
    state.registry.broadcast_and_close_all(&serde_json::json!({
        "type": "shutdown",
        "message": "server shutting down",
    }));
    tracing::info!(connections, "Closed all SSE connections");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "timefeed=info,sse_hub=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}
