use super::registry::{ServerEntry, ServerRegistry};
use super::supervisor;
use crate::config::{McpConfig, ServerDefinition, validate_definitions};
use crate::error::{Result, SwitchboardError};
use crate::mcp::{
    ClientSettings, ClientStatus, McpClient, QualifiedToolName, ToolCallResponse,
};
use crate::routing::{Catalog, CatalogSource, ToolConflict};
use crate::transport::{ProcessSessionFactory, SessionFactory};
use arc_swap::ArcSwap;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Status of one managed server
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    #[serde(flatten)]
    pub client: ClientStatus,
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartupFailure {
    pub server: String,
    pub kind: &'static str,
    pub error: String,
}

/// Outcome of `ServerManager::start`
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartupReport {
    pub ready: Vec<String>,
    pub failed: Vec<StartupFailure>,
    pub disabled: Vec<String>,
    pub conflicts: Vec<ToolConflict>,
}

impl StartupReport {
    /// Every enabled server came up and no tools collided
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.conflicts.is_empty()
    }
}

pub(crate) struct ManagerInner {
    registry: ServerRegistry,
    factory: Arc<dyn SessionFactory>,
    config: McpConfig,
    catalog: ArcSwap<Catalog>,
    shutdown: CancellationToken,
    supervisors: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Owns one client per configured server and routes qualified tool calls
/// to them. Constructed and torn down explicitly by its caller.
#[derive(Clone)]
pub struct ServerManager {
    inner: Arc<ManagerInner>,
}

impl ServerManager {
    pub fn new(config: McpConfig, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                registry: ServerRegistry::new(),
                factory,
                config,
                catalog: ArcSwap::from_pointee(Catalog::default()),
                shutdown: CancellationToken::new(),
                supervisors: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Manager that spawns local servers and dials remote ones
    pub fn with_process_factory(config: McpConfig) -> Self {
        let factory = Arc::new(ProcessSessionFactory::new(config.shutdown_grace()));
        Self::new(config, factory)
    }

    pub(crate) fn from_inner(inner: Arc<ManagerInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<ManagerInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &McpConfig {
        &self.inner.config
    }

    /// Validate, register and start the given servers concurrently.
    ///
    /// Definitions are all checked before anything is launched. A server
    /// that fails to come up is left `Degraded`, reported, and kept out of
    /// the catalog; it never blocks the others.
    pub async fn start(&self, definitions: Vec<ServerDefinition>) -> Result<StartupReport> {
        validate_definitions(&definitions)?;
        let already: Vec<String> = definitions
            .iter()
            .filter(|d| self.inner.registry.contains(&d.name))
            .map(|d| d.name.clone())
            .collect();
        if !already.is_empty() {
            return Err(SwitchboardError::configuration(
                already.clone(),
                format!("servers already registered: {}", already.join(", ")),
            ));
        }

        let mut report = StartupReport::default();
        let mut entries = Vec::new();
        for definition in definitions {
            if !definition.enabled {
                info!("Skipping disabled MCP server: {}", definition.name);
                report.disabled.push(definition.name);
                continue;
            }
            let client = McpClient::new(
                definition,
                ClientSettings::from(&self.inner.config),
                self.inner.factory.clone(),
            );
            entries.push(self.inner.registry.register(client)?);
        }

        info!("Starting {} MCP servers", entries.len());
        let outcomes = join_all(entries.iter().map(|entry| self.bring_up(&entry.client))).await;
        for (entry, outcome) in entries.iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.ready.push(entry.name().to_string()),
                Err(e) => {
                    error!("MCP server {} failed to start: {}", entry.name(), e);
                    report.failed.push(StartupFailure {
                        server: entry.name().to_string(),
                        kind: e.kind(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let catalog = self.refresh_catalog().await;
        report.conflicts = catalog.conflicts().to_vec();

        let mut supervisors = self.inner.supervisors.lock().await;
        for entry in &entries {
            supervisors.push(tokio::spawn(supervisor::supervise(
                self.downgrade(),
                entry.clone(),
                self.inner.shutdown.child_token(),
            )));
        }

        info!(
            "MCP servers started: {} ready, {} failed, {} tools in catalog",
            report.ready.len(),
            report.failed.len(),
            catalog.len()
        );
        Ok(report)
    }

    /// Rebuild the catalog from every `Ready` server and swap it in
    pub async fn aggregated_catalog(&self) -> Arc<Catalog> {
        self.refresh_catalog().await
    }

    /// The most recently built catalog, without rebuilding
    pub fn catalog(&self) -> Arc<Catalog> {
        self.inner.catalog.load_full()
    }

    /// Route a `server.tool` call to its owning client. Nothing is queued
    /// for servers that are not `Ready`.
    pub async fn call_tool(&self, qualified: &str, arguments: Value) -> Result<ToolCallResponse> {
        let name = QualifiedToolName::parse(qualified)
            .ok_or_else(|| SwitchboardError::UnknownTool(qualified.to_string()))?;
        let entry = self.inner.registry.get(&name.server)?;

        let state = entry.client.state();
        if !state.is_ready() {
            return Err(SwitchboardError::ServerUnavailable {
                server: name.server,
                state,
            });
        }
        if let Some(conflict) = self.refresh_catalog().await.withheld(&name) {
            return Err(conflict.to_error());
        }

        entry.client.call_tool(&name.tool, arguments).await
    }

    /// Close and start one server again, outside the backoff policy
    pub async fn restart_server(&self, name: &str) -> Result<ServerStatus> {
        let entry = self.inner.registry.get(name)?;
        let result = {
            let _lifecycle = entry.lifecycle.lock().await;
            info!("Restarting MCP server: {}", name);
            entry.client.close().await?;
            let result = self.bring_up(&entry.client).await;
            if result.is_ok() {
                entry.reconnect_attempts.store(0, Ordering::Release);
            }
            result
        };
        self.refresh_catalog().await;
        result?;
        Ok(self.status_of(&entry).await)
    }

    pub async fn server_status(&self, name: &str) -> Result<ServerStatus> {
        let entry = self.inner.registry.get(name)?;
        Ok(self.status_of(&entry).await)
    }

    pub async fn list_servers(&self) -> Vec<ServerStatus> {
        let entries = self.inner.registry.list();
        join_all(entries.iter().map(|entry| self.status_of(entry))).await
    }

    pub async fn ping(&self, name: &str) -> Result<Duration> {
        self.inner.registry.get(name)?.client.ping().await
    }

    /// Close every client concurrently. Failures are logged, never raised.
    pub async fn shutdown(&self) {
        let entries = self.inner.registry.list();
        info!("Shutting down {} MCP servers", entries.len());
        self.inner.shutdown.cancel();

        join_all(entries.iter().map(|entry| async move {
            if let Err(e) = entry.client.close().await {
                error!("Error closing MCP server {}: {}", entry.name(), e);
            }
        }))
        .await;

        for handle in self.inner.supervisors.lock().await.drain(..) {
            handle.abort();
        }
        self.inner.catalog.store(Arc::new(Catalog::default()));
        info!("All MCP servers shut down");
    }

    /// Start a client and discover its tools, both within the server's
    /// startup deadline
    pub(crate) async fn bring_up(&self, client: &McpClient) -> Result<()> {
        let timeout = client
            .definition()
            .startup_timeout(self.inner.config.startup_timeout());
        let startup = async {
            client.start().await?;
            client.discover_tools().await?;
            Ok::<(), SwitchboardError>(())
        };
        match tokio::time::timeout(timeout, startup).await {
            Ok(result) => result,
            Err(_) => Err(client.abandon_startup(timeout).await),
        }
    }

    pub(crate) async fn refresh_catalog(&self) -> Arc<Catalog> {
        let entries = self.inner.registry.list();
        let sources: Vec<CatalogSource> = join_all(entries.iter().map(|entry| async move {
            CatalogSource {
                server: entry.name().to_string(),
                tools: entry.client.tools().await,
            }
        }))
        .await
        .into_iter()
        .filter(|source| !source.tools.is_empty())
        .collect();

        let catalog = Arc::new(Catalog::aggregate(
            &sources,
            self.inner.config.collision_policy,
        ));
        let previous = self.inner.catalog.swap(catalog.clone());
        if *previous != *catalog {
            info!(
                "Tool catalog rebuilt: {} tools from {} servers",
                catalog.len(),
                sources.len()
            );
            if let Some(conflict) = catalog.conflict_error() {
                warn!("{}", conflict);
            }
        }
        catalog
    }

    async fn status_of(&self, entry: &ServerEntry) -> ServerStatus {
        ServerStatus {
            client: entry.client.status().await,
            reconnect_attempts: entry.attempts(),
        }
    }
}
