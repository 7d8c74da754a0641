use crate::error::{Result, SwitchboardError};
use crate::mcp::McpClient;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// A registered server: its client plus the manager's bookkeeping
pub(crate) struct ServerEntry {
    pub(crate) client: McpClient,
    /// Registration order, used to break ties between servers
    pub(crate) order: usize,
    pub(crate) reconnect_attempts: AtomicU32,
    /// Serializes restarts and reconnects of this server
    pub(crate) lifecycle: Mutex<()>,
}

impl ServerEntry {
    pub(crate) fn name(&self) -> &str {
        self.client.name()
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Acquire)
    }
}

/// Registry of the clients a manager owns
#[derive(Clone, Default)]
pub(crate) struct ServerRegistry {
    servers: Arc<DashMap<String, Arc<ServerEntry>>>,
    next_order: Arc<AtomicUsize>,
}

impl ServerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a client under its server name
    pub(crate) fn register(&self, client: McpClient) -> Result<Arc<ServerEntry>> {
        match self.servers.entry(client.name().to_string()) {
            Entry::Occupied(occupied) => Err(SwitchboardError::configuration(
                vec![occupied.key().clone()],
                format!("server '{}' is already registered", occupied.key()),
            )),
            Entry::Vacant(vacant) => {
                let entry = Arc::new(ServerEntry {
                    client,
                    order: self.next_order.fetch_add(1, Ordering::Relaxed),
                    reconnect_attempts: AtomicU32::new(0),
                    lifecycle: Mutex::new(()),
                });
                vacant.insert(entry.clone());
                Ok(entry)
            }
        }
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    pub(crate) fn get(&self, name: &str) -> Result<Arc<ServerEntry>> {
        self.servers
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SwitchboardError::ServerNotFound(name.to_string()))
    }

    /// All entries in registration order
    pub(crate) fn list(&self) -> Vec<Arc<ServerEntry>> {
        let mut entries: Vec<_> = self
            .servers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.order);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerDefinition;
    use crate::mcp::ClientSettings;
    use crate::transport::ProcessSessionFactory;
    use std::time::Duration;

    fn client(name: &str) -> McpClient {
        McpClient::new(
            ServerDefinition::local(name, "cat", vec![]),
            ClientSettings::default(),
            Arc::new(ProcessSessionFactory::new(Duration::from_millis(100))),
        )
    }

    #[test]
    fn test_register_and_get() {
        let registry = ServerRegistry::new();
        registry.register(client("test-server")).unwrap();

        let entry = registry.get("test-server").unwrap();
        assert_eq!(entry.name(), "test-server");
        assert_eq!(entry.attempts(), 0);
        assert!(registry.contains("test-server"));
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = ServerRegistry::new();
        registry.register(client("test-server")).unwrap();

        let result = registry.register(client("test-server"));
        assert!(matches!(
            result,
            Err(SwitchboardError::Configuration { ref servers, .. }) if servers == &["test-server"]
        ));
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_get_unknown_server() {
        let registry = ServerRegistry::new();
        assert!(matches!(
            registry.get("nope"),
            Err(SwitchboardError::ServerNotFound(_))
        ));
    }

    #[test]
    fn test_list_keeps_registration_order() {
        let registry = ServerRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(client(name)).unwrap();
        }

        let names: Vec<_> = registry
            .list()
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
    }
}
