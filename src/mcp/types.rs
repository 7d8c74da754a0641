use rmcp::model::{
    CallToolResult, ErrorCode, ErrorData, JsonRpcError, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, JsonRpcVersion2_0, NumberOrString, RawContent, RequestId,
    ResourceContents, ServerNotification, ServerRequest,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

pub use rmcp::model::{ClientCapabilities, Implementation, InitializeResult, ListToolsResult};

pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";
    pub const LIST_TOOLS: &str = "tools/list";
    pub const CALL_TOOL: &str = "tools/call";
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const CANCELLED: &str = "notifications/cancelled";
}

type ServerMessage = JsonRpcMessage<ServerRequest, Value, ServerNotification>;

/// Method and params of an outbound request or notification
#[derive(Debug, Serialize)]
struct OutboundCall<'a> {
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

pub(crate) fn request_frame(id: u64, method: &str, params: &Value) -> serde_json::Result<String> {
    serde_json::to_string(&JsonRpcRequest {
        jsonrpc: JsonRpcVersion2_0,
        id: NumberOrString::Number(id as _),
        request: OutboundCall {
            method,
            params: Some(params),
        },
    })
}

pub(crate) fn notification_frame(method: &str, params: Option<&Value>) -> serde_json::Result<String> {
    serde_json::to_string(&JsonRpcNotification {
        jsonrpc: JsonRpcVersion2_0,
        notification: OutboundCall { method, params },
    })
}

pub(crate) fn result_frame(id: RequestId, result: Value) -> serde_json::Result<String> {
    serde_json::to_string(&JsonRpcResponse {
        jsonrpc: JsonRpcVersion2_0,
        id,
        result,
    })
}

pub(crate) fn method_not_found_frame(id: RequestId, method: &str) -> serde_json::Result<String> {
    serde_json::to_string(&JsonRpcError {
        jsonrpc: JsonRpcVersion2_0,
        id,
        error: ErrorData::new(
            ErrorCode::METHOD_NOT_FOUND,
            format!("method '{}' is not supported by this client", method),
            None,
        ),
    })
}

#[derive(Debug)]
pub(crate) enum Incoming {
    Response {
        id: u64,
        outcome: Result<Value, ErrorData>,
    },
    Request {
        id: RequestId,
        method: String,
    },
    ToolListChanged,
    Notification {
        method: String,
    },
}

impl Incoming {
    /// Classify one frame. Anything that is not a well-formed JSON-RPC
    /// message is reported as a parse error string.
    pub(crate) fn parse(frame: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(frame).map_err(|e| format!("invalid JSON-RPC frame: {}", e))?;

        match serde_json::from_value::<ServerMessage>(value.clone()) {
            Ok(JsonRpcMessage::Response(response)) => Ok(Incoming::Response {
                id: correlation_id(&response.id)?,
                outcome: Ok(response.result),
            }),
            Ok(JsonRpcMessage::Error(error)) => Ok(Incoming::Response {
                id: correlation_id(&error.id)?,
                outcome: Err(error.error),
            }),
            Ok(JsonRpcMessage::Request(request)) => {
                let method = match &request.request {
                    ServerRequest::PingRequest(_) => methods::PING.to_string(),
                    other => method_name(other),
                };
                Ok(Incoming::Request {
                    id: request.id,
                    method,
                })
            }
            Ok(JsonRpcMessage::Notification(notification)) => match notification.notification {
                ServerNotification::ToolListChangedNotification(_) => Ok(Incoming::ToolListChanged),
                other => Ok(Incoming::Notification {
                    method: method_name(&other),
                }),
            },
            Ok(_) => Err("batched JSON-RPC messages are not supported".to_string()),
            // Requests and notifications the typed model rejects still need
            // an answer or a log line, so classify them by shape.
            Err(e) => classify_untyped(&value, e),
        }
    }
}

fn classify_untyped(value: &Value, error: serde_json::Error) -> Result<Incoming, String> {
    let method = value.get("method").and_then(Value::as_str);
    match (method, value.get("id")) {
        (Some(method), Some(id)) => {
            let id = serde_json::from_value::<RequestId>(id.clone())
                .map_err(|_| format!("request {} carries an invalid id: {}", method, id))?;
            Ok(Incoming::Request {
                id,
                method: method.to_string(),
            })
        }
        (Some(method), None) => Ok(Incoming::Notification {
            method: method.to_string(),
        }),
        _ => Err(format!("invalid JSON-RPC message: {}", error)),
    }
}

fn method_name(message: &impl Serialize) -> String {
    serde_json::to_value(message)
        .ok()
        .and_then(|v| v.get("method").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

fn correlation_id(id: &RequestId) -> Result<u64, String> {
    let parsed = match id {
        NumberOrString::Number(n) => u64::try_from(*n).ok(),
        NumberOrString::String(s) => s.parse().ok(),
    };
    parsed.ok_or_else(|| format!("response carries an id that was never issued: {:?}", id))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InitializeParams {
    pub(crate) protocol_version: String,
    pub(crate) capabilities: ClientCapabilities,
    pub(crate) client_info: Implementation,
}

/// Protocol version string a server answered with
pub(crate) fn negotiated_version(result: &InitializeResult) -> String {
    match serde_json::to_value(&result.protocol_version) {
        Ok(Value::String(version)) => version,
        _ => String::new(),
    }
}

pub(crate) fn has_capability(result: &InitializeResult, name: &str) -> bool {
    serde_json::to_value(&result.capabilities)
        .ok()
        .and_then(|capabilities| capabilities.get(name).cloned())
        .is_some_and(|value| !value.is_null())
}

/// Response from an MCP tool call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallResponse {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    pub is_error: bool,
}

impl ToolCallResponse {
    /// Decode a `tools/call` result. Content kinds the gateway does not relay
    /// are dropped with a warning rather than failing the whole call.
    pub(crate) fn from_result(server_name: &str, result: Value) -> serde_json::Result<Self> {
        let result: CallToolResult = serde_json::from_value(result)?;
        let content = result
            .content
            .into_iter()
            .filter_map(|c| match c.raw {
                RawContent::Text(t) => Some(ToolContent::Text { text: t.text }),
                RawContent::Image(i) => Some(ToolContent::Image {
                    data: i.data,
                    mime_type: i.mime_type,
                }),
                RawContent::Resource(r) => match r.resource {
                    ResourceContents::TextResourceContents { uri, mime_type, .. }
                    | ResourceContents::BlobResourceContents { uri, mime_type, .. } => {
                        Some(ToolContent::Resource { uri, mime_type })
                    }
                },
                other => {
                    warn!(
                        "Dropping unsupported content item from server {}: {}",
                        server_name,
                        content_kind(&other)
                    );
                    None
                }
            })
            .collect();

        Ok(Self {
            content,
            structured_content: result.structured_content,
            is_error: result.is_error.unwrap_or(false),
        })
    }

    /// Concatenated text parts, used as the message of failed calls
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn content_kind(content: &RawContent) -> String {
    serde_json::to_value(content)
        .ok()
        .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        uri: String,
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}
