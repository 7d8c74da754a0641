//! Connection and routing layer for Model Context Protocol servers.
//!
//! A [`ServerManager`] launches or dials one [`McpClient`] per configured
//! server, runs the MCP handshake and tool discovery on each, and merges
//! their tools into a single catalog addressed as `server.tool`.

pub mod api;
pub mod config;
pub mod error;
pub mod mcp;
pub mod routing;
pub mod server;
pub mod transport;

pub use error::{Result, SwitchboardError};
pub use mcp::{ConnectionState, McpClient, QualifiedToolName, ToolCallResponse, ToolDescriptor};
pub use routing::Catalog;
pub use server::{ServerManager, StartupReport, ToolHost};
