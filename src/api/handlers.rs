use crate::error::SwitchboardError;
use crate::server::ServerManager;
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    response::IntoResponse,
};
use serde_json::{Value, json};
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    pub manager: ServerManager,
}

pub(crate) async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub(crate) async fn server_info() -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "authors": env!("CARGO_PKG_AUTHORS"),
        "protocol_versions": crate::mcp::SUPPORTED_PROTOCOL_VERSIONS,
    }))
}

pub(crate) async fn list_servers(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({
        "servers": state.manager.list_servers().await
    }))
}

pub(crate) async fn server_status(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, SwitchboardError> {
    let status = state.manager.server_status(&name).await?;
    Ok(Json(json!(status)))
}

pub(crate) async fn restart_server(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, SwitchboardError> {
    info!("Received request to restart server: {}", name);

    let status = state.manager.restart_server(&name).await?;
    Ok(Json(json!({
        "name": name,
        "action": "restart",
        "status": "success",
        "server": status,
    })))
}

pub(crate) async fn ping_server(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, SwitchboardError> {
    let latency = state.manager.ping(&name).await?;
    Ok(Json(json!({
        "name": name,
        "latency_ms": latency.as_secs_f64() * 1000.0,
    })))
}

pub(crate) async fn list_tools(State(state): State<ApiState>) -> impl IntoResponse {
    let catalog = state.manager.aggregated_catalog().await;
    let tools: Vec<Value> = catalog
        .tools()
        .map(|tool| {
            json!({
                "name": tool.qualified_name(),
                "server": tool.server,
                "tool": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema,
            })
        })
        .collect();

    Json(json!({
        "count": tools.len(),
        "tools": tools,
        "conflicts": catalog.conflicts(),
    }))
}

/// The request body is the arguments object; an empty body means `{}`
pub(crate) async fn call_tool(
    State(state): State<ApiState>,
    Path(qualified): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, SwitchboardError> {
    let arguments = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&body)?
    };

    let response = state.manager.call_tool(&qualified, arguments).await?;
    Ok(Json(json!(response)))
}
