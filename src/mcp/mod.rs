//! MCP protocol layer: wire types, argument schemas, and the per-server
//! client that runs the handshake and multiplexes requests.

pub(crate) mod client;
pub(crate) mod schema;
pub(crate) mod state;
pub(crate) mod tool;
pub(crate) mod types;

pub use client::{ClientSettings, ClientStatus, McpClient, PendingCallInfo};
pub use schema::{NumberRange, Schema, SchemaViolation, ValidationResult};
pub use state::ConnectionState;
pub use tool::{QualifiedToolName, ToolDescriptor};
pub use types::{
    Implementation, InitializeResult, LATEST_PROTOCOL_VERSION,
    SUPPORTED_PROTOCOL_VERSIONS, ToolCallResponse, ToolContent, methods,
};
