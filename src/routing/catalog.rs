use crate::config::CollisionPolicy;
use crate::error::SwitchboardError;
use crate::mcp::{QualifiedToolName, ToolDescriptor};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A tool name offered by more than one Ready server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolConflict {
    pub tool: String,
    /// In registration order
    pub servers: Vec<String>,
    /// Server whose tool stayed callable, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kept: Option<String>,
}

impl ToolConflict {
    pub fn describe(&self) -> String {
        let servers = self.servers.join(", ");
        match &self.kept {
            Some(kept) => format!(
                "tool '{}' is declared by {}; only {} is exposed",
                self.tool, servers, kept
            ),
            None => format!(
                "tool '{}' is declared by {}; none are exposed",
                self.tool, servers
            ),
        }
    }

    pub fn to_error(&self) -> SwitchboardError {
        SwitchboardError::configuration(self.servers.clone(), self.describe())
    }
}

/// Tools of one Ready server, fed into aggregation in registration order
#[derive(Debug, Clone)]
pub struct CatalogSource {
    pub server: String,
    pub tools: Arc<Vec<ToolDescriptor>>,
}

/// The flattened, qualified view over every Ready server's tools.
///
/// Built in one pass and swapped in whole; never edited in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Catalog {
    tools: BTreeMap<QualifiedToolName, ToolDescriptor>,
    conflicts: Vec<ToolConflict>,
}

impl Catalog {
    /// Merge the sources. Equal inputs always produce equal catalogs.
    pub fn aggregate(sources: &[CatalogSource], policy: CollisionPolicy) -> Self {
        let mut owners: BTreeMap<&str, Vec<&ToolDescriptor>> = BTreeMap::new();
        for source in sources {
            for tool in source.tools.iter() {
                owners.entry(tool.name.as_str()).or_default().push(tool);
            }
        }

        let mut tools = BTreeMap::new();
        let mut conflicts = Vec::new();
        for (name, descriptors) in owners {
            let Some(first) = descriptors.first() else {
                continue;
            };
            if descriptors.len() == 1 {
                tools.insert(first.qualified_name(), (*first).clone());
                continue;
            }

            let kept = match policy {
                CollisionPolicy::RejectAll => None,
                CollisionPolicy::RejectLater => {
                    tools.insert(first.qualified_name(), (*first).clone());
                    Some(first.server.clone())
                }
            };
            conflicts.push(ToolConflict {
                tool: name.to_string(),
                servers: descriptors.iter().map(|d| d.server.clone()).collect(),
                kept,
            });
        }

        Self { tools, conflicts }
    }

    pub fn get(&self, name: &QualifiedToolName) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    pub fn tools(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn conflicts(&self) -> &[ToolConflict] {
        &self.conflicts
    }

    /// The conflict that withheld `server.tool`, if that is why it is missing
    pub fn withheld(&self, name: &QualifiedToolName) -> Option<&ToolConflict> {
        if self.tools.contains_key(name) {
            return None;
        }
        self.conflicts
            .iter()
            .find(|c| c.tool == name.tool && c.servers.contains(&name.server))
    }

    /// All collisions as one configuration error naming every server involved
    pub fn conflict_error(&self) -> Option<SwitchboardError> {
        if self.conflicts.is_empty() {
            return None;
        }

        let mut servers: Vec<String> = Vec::new();
        for conflict in &self.conflicts {
            for server in &conflict.servers {
                if !servers.contains(server) {
                    servers.push(server.clone());
                }
            }
        }
        let message = self
            .conflicts
            .iter()
            .map(ToolConflict::describe)
            .collect::<Vec<_>>()
            .join("; ");

        Some(SwitchboardError::configuration(servers, message))
    }
}
