use crate::api::handlers::ApiState;
use axum::{
    Router,
    routing::{get, post},
};

pub fn health_routes() -> Router<ApiState> {
    Router::new()
        .route("/health", get(super::handlers::health_check))
        .route("/info", get(super::handlers::server_info))
}

pub fn management_routes() -> Router<ApiState> {
    Router::new()
        .route("/servers", get(super::handlers::list_servers))
        .route(
            "/servers/{name}/status",
            get(super::handlers::server_status),
        )
        .route(
            "/servers/{name}/restart",
            post(super::handlers::restart_server),
        )
        .route("/servers/{name}/ping", post(super::handlers::ping_server))
}

pub fn tool_routes() -> Router<ApiState> {
    Router::new()
        .route("/tools", get(super::handlers::list_tools))
        .route(
            "/tools/{qualified}/call",
            post(super::handlers::call_tool),
        )
}
