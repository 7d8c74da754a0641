pub mod handlers;
pub mod routes;

use crate::config::AppConfig;
use crate::server::ServerManager;
use anyhow::{Context, Result};
use axum::Router;
use handlers::ApiState;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

/// Start every configured server, then serve the gateway until Ctrl+C or
/// SIGTERM. Servers are shut down after the listener drains.
pub async fn start_server(config: AppConfig) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);

    let manager = ServerManager::with_process_factory(config.mcp.clone());
    let report = manager.start(config.servers.clone()).await?;
    for failure in &report.failed {
        warn!(
            "Server {} is degraded ({}): {}",
            failure.server, failure.kind, failure.error
        );
    }
    for conflict in &report.conflicts {
        warn!("Tool conflict: {}", conflict.describe());
    }

    let app = build_router(ApiState {
        manager: manager.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Server list: http://{}/servers", addr);
    info!("Tool catalog: http://{}/tools", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    manager.shutdown().await;
    served?;
    Ok(())
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .merge(routes::management_routes())
        .merge(routes::tool_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down...");
        },
        _ = terminate => {
            info!("Received SIGTERM signal, shutting down...");
        },
    }
}
