use crate::config::ToolFilter;
use crate::mcp::ToolDescriptor;

impl ToolFilter {
    /// Check if a tool should be exposed based on include/exclude lists.
    /// The include list is checked first; if present the tool must be in it.
    pub(crate) fn allows(&self, tool_name: &str) -> bool {
        if let Some(include) = &self.include
            && !include.iter().any(|t| t == tool_name)
        {
            return false;
        }

        if let Some(exclude) = &self.exclude
            && exclude.iter().any(|t| t == tool_name)
        {
            return false;
        }

        true
    }
}

/// Drop the discovered tools a server definition does not expose
pub(crate) fn apply_tool_filter(
    tools: Vec<ToolDescriptor>,
    filter: Option<&ToolFilter>,
) -> Vec<ToolDescriptor> {
    match filter {
        None => tools,
        Some(filter) => tools
            .into_iter()
            .filter(|tool| filter.allows(&tool.name))
            .collect(),
    }
}

pub(crate) fn is_tool_allowed(tool_name: &str, filter: Option<&ToolFilter>) -> bool {
    match filter {
        None => true,
        Some(filter) => filter.allows(tool_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> ToolDescriptor {
        ToolDescriptor::new(
            "srv",
            name,
            Some(format!("Test tool {}", name)),
            json!({}),
        )
    }

    fn tools() -> Vec<ToolDescriptor> {
        vec![tool("read"), tool("write"), tool("delete")]
    }

    #[test]
    fn test_apply_no_filter() {
        assert_eq!(apply_tool_filter(tools(), None).len(), 3);
    }

    #[test]
    fn test_apply_include_filter() {
        let filter = ToolFilter {
            include: Some(vec!["read".to_string(), "write".to_string()]),
            exclude: None,
        };

        let filtered = apply_tool_filter(tools(), Some(&filter));
        let names: Vec<_> = filtered.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["read", "write"]);
    }

    #[test]
    fn test_apply_exclude_filter() {
        let filter = ToolFilter {
            include: None,
            exclude: Some(vec!["delete".to_string()]),
        };

        let filtered = apply_tool_filter(tools(), Some(&filter));
        let names: Vec<_> = filtered.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["read", "write"]);
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let filter = ToolFilter {
            include: Some(vec!["read".to_string(), "delete".to_string()]),
            exclude: Some(vec!["delete".to_string()]),
        };

        assert!(is_tool_allowed("read", Some(&filter)));
        assert!(!is_tool_allowed("delete", Some(&filter)));
        assert!(!is_tool_allowed("write", Some(&filter)));
    }

    #[test]
    fn test_is_tool_allowed_no_filter() {
        assert!(is_tool_allowed("any_tool", None));
    }
}
