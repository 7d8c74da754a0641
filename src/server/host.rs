use super::manager::ServerManager;
use crate::error::Result;
use crate::mcp::{ToolCallResponse, ToolDescriptor};
use async_trait::async_trait;
use serde_json::Value;

/// What an agent needs from the routing layer: a flat tool list and a way
/// to invoke tools by qualified name.
#[async_trait]
pub trait ToolHost: Send + Sync {
    async fn list_available_tools(&self) -> Vec<ToolDescriptor>;

    async fn invoke(&self, qualified_name: &str, arguments: Value) -> Result<ToolCallResponse>;
}

#[async_trait]
impl ToolHost for ServerManager {
    async fn list_available_tools(&self) -> Vec<ToolDescriptor> {
        self.aggregated_catalog().await.tools().cloned().collect()
    }

    async fn invoke(&self, qualified_name: &str, arguments: Value) -> Result<ToolCallResponse> {
        self.call_tool(qualified_name, arguments).await
    }
}
