use super::schema::{Schema, ValidationResult};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A tool advertised by one server, as of one discovery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub server: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
    #[serde(skip)]
    compiled: Arc<Schema>,
}

impl ToolDescriptor {
    pub fn new(
        server: impl Into<String>,
        name: impl Into<String>,
        description: Option<String>,
        input_schema: Value,
    ) -> Self {
        let compiled = Arc::new(Schema::compile(&input_schema));
        Self {
            server: server.into(),
            name: name.into(),
            description,
            input_schema,
            compiled,
        }
    }

    pub fn qualified_name(&self) -> QualifiedToolName {
        QualifiedToolName::new(&self.server, &self.name)
    }

    /// Check call arguments against the tool's input schema
    pub fn validate(&self, arguments: &Value) -> ValidationResult {
        self.compiled.validate(arguments)
    }
}

/// `server.tool`, the address callers use after aggregation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedToolName {
    pub server: String,
    pub tool: String,
}

impl QualifiedToolName {
    pub const SEPARATOR: char = '.';

    pub fn new(server: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            tool: tool.into(),
        }
    }

    /// Split on the first separator. Server names never contain one, tool
    /// names may.
    pub fn parse(qualified: &str) -> Option<Self> {
        let (server, tool) = qualified.split_once(Self::SEPARATOR)?;
        if server.is_empty() || tool.is_empty() {
            return None;
        }
        Some(Self::new(server, tool))
    }
}

impl fmt::Display for QualifiedToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.server, Self::SEPARATOR, self.tool)
    }
}

impl Serialize for QualifiedToolName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_qualified_name_round_trip() {
        let name = QualifiedToolName::parse("files.read.file").unwrap();
        assert_eq!(name.server, "files");
        assert_eq!(name.tool, "read.file");
        assert_eq!(name.to_string(), "files.read.file");
        assert_eq!(serde_json::to_value(&name).unwrap(), json!("files.read.file"));
    }

    #[test]
    fn test_qualified_name_rejects_incomplete_input() {
        assert!(QualifiedToolName::parse("search").is_none());
        assert!(QualifiedToolName::parse(".search").is_none());
        assert!(QualifiedToolName::parse("srv.").is_none());
    }

    #[test]
    fn test_descriptor_serializes_without_compiled_schema() {
        let tool = ToolDescriptor::new(
            "srv",
            "search",
            Some("Search things".to_string()),
            json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        );
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["server"], "srv");
        assert_eq!(json["name"], "search");
        assert!(json.get("compiled").is_none());
        assert!(tool.validate(&json!({"query": "x"})).is_valid());
    }
}
