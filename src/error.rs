use crate::mcp::{ConnectionState, SchemaViolation};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwitchboardError {
    #[error("Configuration error: {message}")]
    Configuration {
        servers: Vec<String>,
        message: String,
    },

    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Failed to launch server '{server}': {source}")]
    LaunchFailed {
        server: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server '{server}' is unavailable (state: {state})")]
    ServerUnavailable {
        server: String,
        state: ConnectionState,
    },

    #[error("Connection to server '{server}' is closed")]
    ConnectionClosed { server: String },

    #[error("Protocol mismatch with server '{server}': {detail}")]
    ProtocolMismatch { server: String, detail: String },

    #[error("Protocol error from server '{server}': {detail}")]
    Protocol { server: String, detail: String },

    #[error("{operation} on server '{server}' timed out after {after:?}")]
    Timeout {
        server: String,
        operation: String,
        after: Duration,
    },

    #[error("Invalid arguments for tool '{tool}' on server '{server}': {}", format_violations(.violations))]
    InvalidArguments {
        server: String,
        tool: String,
        violations: Vec<SchemaViolation>,
    },

    #[error("Tool '{tool}' on server '{server}' failed: {message}")]
    RemoteToolError {
        server: String,
        tool: String,
        code: Option<i64>,
        message: String,
        data: Option<Value>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SwitchboardError>;

fn format_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl SwitchboardError {
    pub(crate) fn configuration(servers: Vec<String>, message: impl Into<String>) -> Self {
        SwitchboardError::Configuration {
            servers,
            message: message.into(),
        }
    }

    pub(crate) fn connection_closed(server: &str) -> Self {
        SwitchboardError::ConnectionClosed {
            server: server.to_string(),
        }
    }

    pub(crate) fn protocol(server: &str, detail: impl Into<String>) -> Self {
        SwitchboardError::Protocol {
            server: server.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn timeout(server: &str, operation: &str, after: Duration) -> Self {
        SwitchboardError::Timeout {
            server: server.to_string(),
            operation: operation.to_string(),
            after,
        }
    }

    /// Stable machine-readable label for the error class
    pub fn kind(&self) -> &'static str {
        match self {
            SwitchboardError::Configuration { .. } => "configuration_error",
            SwitchboardError::ServerNotFound(_) => "server_not_found",
            SwitchboardError::UnknownTool(_) => "unknown_tool",
            SwitchboardError::LaunchFailed { .. } => "launch_failed",
            SwitchboardError::ServerUnavailable { .. } => "server_unavailable",
            SwitchboardError::ConnectionClosed { .. } => "connection_closed",
            SwitchboardError::ProtocolMismatch { .. } => "protocol_mismatch",
            SwitchboardError::Protocol { .. } => "protocol_error",
            SwitchboardError::Timeout { .. } => "timeout",
            SwitchboardError::InvalidArguments { .. } => "invalid_arguments",
            SwitchboardError::RemoteToolError { .. } => "tool_error",
            SwitchboardError::Io(_) => "io_error",
            SwitchboardError::Json(_) => "json_error",
            SwitchboardError::Internal(_) => "internal_error",
        }
    }

    /// Convert error to HTTP status code
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            SwitchboardError::Configuration { .. } => StatusCode::CONFLICT,
            SwitchboardError::ServerNotFound(_) => StatusCode::NOT_FOUND,
            SwitchboardError::UnknownTool(_) => StatusCode::NOT_FOUND,
            SwitchboardError::LaunchFailed { .. } => StatusCode::BAD_GATEWAY,
            SwitchboardError::ServerUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SwitchboardError::ConnectionClosed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SwitchboardError::ProtocolMismatch { .. } => StatusCode::BAD_GATEWAY,
            SwitchboardError::Protocol { .. } => StatusCode::BAD_GATEWAY,
            SwitchboardError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            SwitchboardError::InvalidArguments { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            SwitchboardError::RemoteToolError { .. } => StatusCode::BAD_GATEWAY,
            SwitchboardError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SwitchboardError::Json(_) => StatusCode::BAD_REQUEST,
            SwitchboardError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Extra structured detail rendered alongside the message
    fn details(&self) -> Value {
        match self {
            SwitchboardError::Configuration { servers, .. } => serde_json::json!({
                "servers": servers,
            }),
            SwitchboardError::InvalidArguments { violations, .. } => serde_json::json!({
                "violations": violations,
            }),
            SwitchboardError::RemoteToolError { code, data, .. } => serde_json::json!({
                "remote_code": code,
                "data": data,
            }),
            SwitchboardError::ServerUnavailable { state, .. } => serde_json::json!({
                "state": state,
            }),
            _ => Value::Null,
        }
    }
}

// Implement conversion from anyhow::Error for convenience
impl From<anyhow::Error> for SwitchboardError {
    fn from(err: anyhow::Error) -> Self {
        SwitchboardError::Internal(err.to_string())
    }
}

impl axum::response::IntoResponse for SwitchboardError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let mut body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "code": status.as_u16(),
        });
        let details = self.details();
        if !details.is_null() {
            body["details"] = details;
        }

        (status, axum::Json(body)).into_response()
    }
}
