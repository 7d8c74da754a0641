use super::state::ConnectionState;
use super::tool::ToolDescriptor;
use super::types::{
    ClientCapabilities, Implementation, Incoming, InitializeParams, InitializeResult,
    ListToolsResult, SUPPORTED_PROTOCOL_VERSIONS, ToolCallResponse, has_capability,
    method_not_found_frame, methods, negotiated_version, notification_frame, request_frame,
    result_frame,
};
use super::schema::{SchemaViolation, ValidationResult};
use crate::config::{McpConfig, ServerDefinition, TransportKind};
use crate::error::{Result, SwitchboardError};
use crate::routing::tool_filter::apply_tool_filter;
use crate::transport::{FrameError, FrameStream, SessionFactory, TransportSession};
use futures::StreamExt;
use rmcp::model::{CallToolRequestParams, ErrorData, PaginatedRequestParams};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Guard against servers that hand out cursors forever
const MAX_TOOL_PAGES: usize = 100;

/// Per-client protocol tuning
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub protocol_version: String,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    pub client_info: Implementation,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from(&McpConfig::default())
    }
}

impl From<&McpConfig> for ClientSettings {
    fn from(config: &McpConfig) -> Self {
        Self {
            protocol_version: config.protocol_version.clone(),
            handshake_timeout: config.handshake_timeout(),
            request_timeout: config.request_timeout(),
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
        }
    }
}

/// Point-in-time view of a client, for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    pub name: String,
    pub transport: TransportKind,
    pub state: ConnectionState,
    pub generation: u64,
    pub tool_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Implementation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub pending_calls: usize,
}

/// An outstanding request, as seen from outside the client
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCallInfo {
    pub id: u64,
    pub method: String,
    pub deadline: Instant,
}

enum Completion {
    Reply(std::result::Result<Value, ErrorData>),
    Closed,
    Aborted(String),
}

struct PendingCall {
    method: String,
    params: Value,
    deadline: Instant,
    responder: oneshot::Sender<Completion>,
}

/// One connection generation: a session plus its correlation table
struct Connection {
    generation: u64,
    session: Arc<TransportSession>,
    pending: Mutex<HashMap<u64, PendingCall>>,
    next_id: AtomicU64,
}

impl Connection {
    fn new(generation: u64, session: Arc<TransportSession>) -> Self {
        Self {
            generation,
            session,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    async fn fail_pending(&self) {
        let drained: Vec<_> = self.pending.lock().await.drain().collect();
        for (id, call) in drained {
            debug!(
                "[{}] failing pending {} (id {}) after connection loss",
                self.session.label(),
                call.method,
                id
            );
            trace!("[{}] abandoned params: {}", self.session.label(), call.params);
            let _ = call.responder.send(Completion::Closed);
        }
    }

    async fn abort_pending(&self, reason: &str) {
        let drained: Vec<_> = self.pending.lock().await.drain().collect();
        for (_, call) in drained {
            let _ = call.responder.send(Completion::Aborted(reason.to_string()));
        }
    }
}

struct ActiveConnection {
    connection: Arc<Connection>,
    reader: JoinHandle<()>,
}

struct ToolSet {
    generation: u64,
    tools: Arc<Vec<ToolDescriptor>>,
}

struct ClientInner {
    definition: Arc<ServerDefinition>,
    settings: ClientSettings,
    factory: Arc<dyn SessionFactory>,
    state: watch::Sender<ConnectionState>,
    tools_revision: watch::Sender<u64>,
    generation: AtomicU64,
    lifecycle: Mutex<()>,
    connection: RwLock<Option<ActiveConnection>>,
    tools: RwLock<ToolSet>,
    negotiated: RwLock<Option<InitializeResult>>,
    last_error: RwLock<Option<String>>,
}

/// MCP client for one external server.
///
/// Multiplexes any number of concurrent requests over a single transport
/// session. Responses are matched to callers by correlation id, so they may
/// arrive in any order. Every restart opens a new connection generation;
/// requests in flight against an older generation always fail.
#[derive(Clone)]
pub struct McpClient {
    inner: Arc<ClientInner>,
}

impl McpClient {
    pub fn new(
        definition: ServerDefinition,
        settings: ClientSettings,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (tools_revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(ClientInner {
                definition: Arc::new(definition),
                settings,
                factory,
                state,
                tools_revision,
                generation: AtomicU64::new(0),
                lifecycle: Mutex::new(()),
                connection: RwLock::new(None),
                tools: RwLock::new(ToolSet {
                    generation: 0,
                    tools: Arc::new(Vec::new()),
                }),
                negotiated: RwLock::new(None),
                last_error: RwLock::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.definition.name
    }

    pub fn definition(&self) -> &ServerDefinition {
        &self.inner.definition
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Watch tool set replacements
    pub fn subscribe_tools(&self) -> watch::Receiver<u64> {
        self.inner.tools_revision.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.last_error.read().await.clone()
    }

    pub async fn negotiated(&self) -> Option<InitializeResult> {
        self.inner.negotiated.read().await.clone()
    }

    /// Open a session and run the handshake. Ends in `Ready` on success and
    /// `Degraded` on failure. A no-op when already `Ready`.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.state().is_ready() {
            debug!("MCP server {} already ready", self.name());
            return Ok(());
        }

        self.teardown().await;
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.inner.negotiated.write().await = None;
        self.inner.state.send_replace(ConnectionState::Connecting);
        info!(
            "Starting MCP server: {} (generation {})",
            self.name(),
            generation
        );

        let session = match self.inner.factory.open(&self.inner.definition).await {
            Ok(session) => Arc::new(session),
            Err(e) => return Err(self.start_failed(generation, e).await),
        };
        let Some(frames) = session.take_frames().await else {
            let error = SwitchboardError::Internal(format!(
                "frames of server '{}' were already taken",
                self.name()
            ));
            return Err(self.start_failed(generation, error).await);
        };

        let connection = Arc::new(Connection::new(generation, session.clone()));
        {
            let mut slot = self.inner.connection.write().await;
            if self.generation() != generation {
                drop(slot);
                let _ = session.close().await;
                return Err(SwitchboardError::connection_closed(self.name()));
            }
            let reader = tokio::spawn(receive_loop(
                Arc::downgrade(&self.inner),
                connection.clone(),
                frames,
            ));
            *slot = Some(ActiveConnection {
                connection: connection.clone(),
                reader,
            });
        }

        self.transition(
            generation,
            ConnectionState::Handshaking,
            &[ConnectionState::Connecting],
        );

        match self.handshake(&connection).await {
            Ok(result) => {
                info!(
                    "MCP server {} ready (protocol {}, server {} {})",
                    self.name(),
                    negotiated_version(&result),
                    result.server_info.name,
                    result.server_info.version
                );
                *self.inner.negotiated.write().await = Some(result);
                if !self.transition(
                    generation,
                    ConnectionState::Ready,
                    &[ConnectionState::Handshaking],
                ) {
                    return Err(SwitchboardError::connection_closed(self.name()));
                }
                *self.inner.last_error.write().await = None;
                Ok(())
            }
            Err(e) => Err(self.start_failed(generation, e).await),
        }
    }

    /// `start` bounded by a deadline. A start that overruns is abandoned and
    /// the client is left `Degraded`.
    pub async fn start_with_timeout(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.start()).await {
            Ok(result) => result,
            Err(_) => Err(self.abandon_startup(timeout).await),
        }
    }

    /// Give up on a startup that overran `timeout`: drop the connection and
    /// leave the client `Degraded`.
    pub(crate) async fn abandon_startup(&self, timeout: Duration) -> SwitchboardError {
        let error = SwitchboardError::timeout(self.name(), "startup", timeout);
        warn!("{}", error);
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.teardown().await;
        *self.inner.last_error.write().await = Some(error.to_string());
        self.inner.state.send_replace(ConnectionState::Degraded);
        error
    }

    /// Ask the server for its tools, following pagination, and replace the
    /// current tool set. Only valid in `Ready`.
    pub async fn discover_tools(&self) -> Result<Arc<Vec<ToolDescriptor>>> {
        let connection = self.ready_connection().await?;
        match self.fetch_tools(&connection).await {
            Ok(tools) => {
                let tools = Arc::new(tools);
                {
                    let mut current = self.inner.tools.write().await;
                    if self.generation() != connection.generation {
                        return Err(SwitchboardError::connection_closed(self.name()));
                    }
                    *current = ToolSet {
                        generation: connection.generation,
                        tools: tools.clone(),
                    };
                }
                self.inner.tools_revision.send_modify(|r| *r += 1);
                info!(
                    "Discovered {} tools on MCP server {}",
                    tools.len(),
                    self.name()
                );
                Ok(tools)
            }
            Err(e) => {
                self.degrade(connection.generation, format!("tool discovery failed: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    /// Tools of the current generation. Empty unless `Ready` and discovered.
    pub async fn tools(&self) -> Arc<Vec<ToolDescriptor>> {
        let current = self.inner.tools.read().await;
        if self.state().is_ready() && current.generation == self.generation() {
            current.tools.clone()
        } else {
            Arc::new(Vec::new())
        }
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResponse> {
        self.call_tool_with_timeout(name, arguments, self.inner.settings.request_timeout)
            .await
    }

    /// Invoke a tool. Arguments are checked against the tool's input schema
    /// before anything is sent; a `null` argument value means `{}`.
    pub async fn call_tool_with_timeout(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolCallResponse> {
        let connection = self.ready_connection().await?;
        let tools = self.tools().await;
        let tool = tools
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| SwitchboardError::UnknownTool(format!("{}.{}", self.name(), name)))?;

        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        if let ValidationResult::Invalid(violations) = tool.validate(&arguments) {
            debug!(
                "Rejected call to {}.{}: {} schema violations",
                self.name(),
                name,
                violations.len()
            );
            return Err(SwitchboardError::InvalidArguments {
                server: self.name().to_string(),
                tool: name.to_string(),
                violations,
            });
        }

        let Value::Object(arguments) = arguments else {
            return Err(SwitchboardError::InvalidArguments {
                server: self.name().to_string(),
                tool: name.to_string(),
                violations: vec![SchemaViolation::new("$", "arguments must be an object")],
            });
        };

        debug!("Calling tool {} on MCP server {}", name, self.name());
        let params = serde_json::to_value(CallToolRequestParams {
            meta: None,
            name: name.to_string().into(),
            arguments: Some(arguments),
            task: None,
        })?;
        let reply = self
            .request(&connection, methods::CALL_TOOL, params, timeout)
            .await?;

        let result = reply.map_err(|error| SwitchboardError::RemoteToolError {
            server: self.name().to_string(),
            tool: name.to_string(),
            code: Some(i64::from(error.code.0)),
            message: error.message.to_string(),
            data: error.data,
        })?;

        let response = match ToolCallResponse::from_result(self.name(), result) {
            Ok(response) => response,
            Err(e) => {
                let detail = format!("malformed tools/call result: {}", e);
                self.degrade(connection.generation, detail.clone()).await;
                return Err(SwitchboardError::protocol(self.name(), detail));
            }
        };

        if response.is_error {
            let text = response.text();
            return Err(SwitchboardError::RemoteToolError {
                server: self.name().to_string(),
                tool: name.to_string(),
                code: None,
                message: if text.is_empty() {
                    "tool reported an error".to_string()
                } else {
                    text
                },
                data: serde_json::to_value(&response.content).ok(),
            });
        }

        Ok(response)
    }

    /// Round-trip a `ping` request
    pub async fn ping(&self) -> Result<Duration> {
        let connection = self.ready_connection().await?;
        let started = Instant::now();
        self.request(
            &connection,
            methods::PING,
            json!({}),
            self.inner.settings.request_timeout,
        )
        .await?
        .map_err(|e| SwitchboardError::protocol(self.name(), format!("ping rejected: {}", e.message)))?;
        Ok(started.elapsed())
    }

    /// Close the client. Pending calls fail with `ConnectionClosed`. Safe to
    /// call any number of times.
    pub async fn close(&self) -> Result<()> {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        let had_connection = self.teardown().await;
        let previous = self.inner.state.send_replace(ConnectionState::Closed);
        if had_connection || previous != ConnectionState::Closed {
            info!("Closed MCP server: {}", self.name());
        }
        Ok(())
    }

    /// Outstanding requests of the current connection
    pub async fn pending_calls(&self) -> Vec<PendingCallInfo> {
        let Some(connection) = self.current_connection().await else {
            return Vec::new();
        };
        let pending = connection.pending.lock().await;
        let mut calls: Vec<_> = pending
            .iter()
            .map(|(id, call)| PendingCallInfo {
                id: *id,
                method: call.method.clone(),
                deadline: call.deadline,
            })
            .collect();
        calls.sort_by_key(|c| c.id);
        calls
    }

    pub async fn status(&self) -> ClientStatus {
        let negotiated = self.negotiated().await;
        ClientStatus {
            name: self.name().to_string(),
            transport: self.inner.definition.launch.kind(),
            state: self.state(),
            generation: self.generation(),
            tool_count: self.tools().await.len(),
            protocol_version: negotiated.as_ref().map(negotiated_version),
            server_info: negotiated.map(|n| n.server_info),
            last_error: self.last_error().await,
            pending_calls: self.pending_calls().await.len(),
        }
    }

    async fn handshake(&self, connection: &Arc<Connection>) -> Result<InitializeResult> {
        let settings = &self.inner.settings;
        let params = serde_json::to_value(InitializeParams {
            protocol_version: settings.protocol_version.clone(),
            capabilities: ClientCapabilities::default(),
            client_info: settings.client_info.clone(),
        })?;

        let reply = self
            .request(
                connection,
                methods::INITIALIZE,
                params,
                settings.handshake_timeout,
            )
            .await?;
        let value = reply.map_err(|e| {
            SwitchboardError::protocol(
                self.name(),
                format!("initialize rejected ({}): {}", e.code.0, e.message),
            )
        })?;
        let result: InitializeResult = serde_json::from_value(value).map_err(|e| {
            SwitchboardError::protocol(self.name(), format!("malformed initialize result: {}", e))
        })?;

        let version = negotiated_version(&result);
        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&version.as_str()) {
            return Err(SwitchboardError::ProtocolMismatch {
                server: self.name().to_string(),
                detail: format!(
                    "server answered with protocol version {}, supported: {}",
                    version,
                    SUPPORTED_PROTOCOL_VERSIONS.join(", ")
                ),
            });
        }
        for capability in &self.inner.definition.capabilities {
            if !has_capability(&result, capability) {
                return Err(SwitchboardError::ProtocolMismatch {
                    server: self.name().to_string(),
                    detail: format!("server does not offer required capability '{}'", capability),
                });
            }
        }

        self.notify(connection, methods::INITIALIZED, None).await?;
        Ok(result)
    }

    async fn fetch_tools(&self, connection: &Arc<Connection>) -> Result<Vec<ToolDescriptor>> {
        if let Some(negotiated) = self.inner.negotiated.read().await.as_ref()
            && !has_capability(negotiated, "tools")
        {
            debug!("MCP server {} does not offer tools", self.name());
            return Ok(Vec::new());
        }

        let mut tools: Vec<ToolDescriptor> = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = serde_json::to_value(PaginatedRequestParams {
                meta: None,
                cursor: cursor.clone(),
            })?;
            let reply = self
                .request(
                    connection,
                    methods::LIST_TOOLS,
                    params,
                    self.inner.settings.request_timeout,
                )
                .await?;
            let value = reply.map_err(|e| {
                SwitchboardError::protocol(
                    self.name(),
                    format!("tools/list rejected ({}): {}", e.code.0, e.message),
                )
            })?;
            let page: ListToolsResult = serde_json::from_value(value).map_err(|e| {
                SwitchboardError::protocol(self.name(), format!("malformed tools/list result: {}", e))
            })?;

            for tool in page.tools {
                let tool_name = tool.name.to_string();
                if !seen.insert(tool_name.clone()) {
                    warn!(
                        "MCP server {} listed tool {} twice, keeping the first",
                        self.name(),
                        tool_name
                    );
                    continue;
                }
                tools.push(ToolDescriptor::new(
                    self.name(),
                    tool_name,
                    tool.description.map(|d| d.to_string()),
                    Value::Object((*tool.input_schema).clone()),
                ));
            }

            match page.next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                Some(_) => {
                    return Err(SwitchboardError::protocol(
                        self.name(),
                        "tools/list returned the same cursor twice",
                    ));
                }
                None => {
                    return Ok(apply_tool_filter(
                        tools,
                        self.inner.definition.tools.as_ref(),
                    ));
                }
            }
        }

        Err(SwitchboardError::protocol(
            self.name(),
            format!("tools/list did not finish within {} pages", MAX_TOOL_PAGES),
        ))
    }

    /// Send one correlated request and wait for its outcome. The outer error
    /// covers transport failures and timeouts, the inner one what the server
    /// replied.
    async fn request(
        &self,
        connection: &Arc<Connection>,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<std::result::Result<Value, ErrorData>> {
        let id = connection.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = request_frame(id, method, &params)?;

        let (responder, outcome) = oneshot::channel();
        connection.pending.lock().await.insert(
            id,
            PendingCall {
                method: method.to_string(),
                params,
                deadline: Instant::now() + timeout,
                responder,
            },
        );

        if let Err(e) = connection.session.send(&frame).await {
            connection.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, outcome).await {
            Ok(Ok(Completion::Reply(reply))) => Ok(reply),
            Ok(Ok(Completion::Closed)) | Ok(Err(_)) => {
                Err(SwitchboardError::connection_closed(self.name()))
            }
            Ok(Ok(Completion::Aborted(reason))) => {
                Err(SwitchboardError::protocol(self.name(), reason))
            }
            Err(_) => {
                connection.pending.lock().await.remove(&id);
                warn!(
                    "{} (id {}) on MCP server {} timed out after {:?}",
                    method,
                    id,
                    self.name(),
                    timeout
                );
                if method != methods::INITIALIZE {
                    let params = json!({ "requestId": id, "reason": "timeout" });
                    if let Err(e) = self.notify(connection, methods::CANCELLED, Some(&params)).await {
                        debug!("[{}] could not send cancellation: {}", self.name(), e);
                    }
                }
                Err(SwitchboardError::timeout(self.name(), method, timeout))
            }
        }
    }

    async fn notify(
        &self,
        connection: &Connection,
        method: &str,
        params: Option<&Value>,
    ) -> Result<()> {
        let frame = notification_frame(method, params)?;
        connection.session.send(&frame).await
    }

    async fn dispatch(&self, connection: &Arc<Connection>, frame: &str) {
        trace!("[{}] <- {}", self.name(), frame);
        match Incoming::parse(frame) {
            Ok(Incoming::Response { id, outcome }) => {
                let pending = connection.pending.lock().await.remove(&id);
                match pending {
                    Some(call) => {
                        let _ = call.responder.send(Completion::Reply(outcome));
                    }
                    None => warn!(
                        "MCP server {} answered unknown or expired request id {}",
                        self.name(),
                        id
                    ),
                }
            }
            Ok(Incoming::Request { id, method }) => {
                let reply = if method == methods::PING {
                    result_frame(id, json!({}))
                } else {
                    debug!(
                        "MCP server {} sent unsupported request {}",
                        self.name(),
                        method
                    );
                    method_not_found_frame(id, &method)
                };
                match reply {
                    Ok(frame) => {
                        if let Err(e) = connection.session.send(&frame).await {
                            debug!("[{}] could not answer server request: {}", self.name(), e);
                        }
                    }
                    Err(e) => warn!("[{}] could not encode reply: {}", self.name(), e),
                }
            }
            Ok(Incoming::ToolListChanged) => {
                info!("Tool list of MCP server {} changed", self.name());
                let client = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.discover_tools().await {
                        warn!(
                            "Re-discovery on MCP server {} failed: {}",
                            client.name(),
                            e
                        );
                    }
                });
            }
            Ok(Incoming::Notification { method }) => {
                debug!("Notification {} from MCP server {}", method, self.name());
            }
            Err(detail) => {
                warn!("MCP server {} sent an unparseable frame: {}", self.name(), detail);
                if self.state() == ConnectionState::Handshaking {
                    connection.abort_pending(&detail).await;
                } else {
                    self.degrade(connection.generation, detail).await;
                }
            }
        }
    }

    async fn ready_connection(&self) -> Result<Arc<Connection>> {
        match self.state() {
            ConnectionState::Ready => {}
            ConnectionState::Closed => {
                return Err(SwitchboardError::connection_closed(self.name()));
            }
            state => {
                return Err(SwitchboardError::ServerUnavailable {
                    server: self.name().to_string(),
                    state,
                });
            }
        }
        self.current_connection()
            .await
            .ok_or_else(|| SwitchboardError::connection_closed(self.name()))
    }

    async fn current_connection(&self) -> Option<Arc<Connection>> {
        self.inner
            .connection
            .read()
            .await
            .as_ref()
            .map(|active| active.connection.clone())
    }

    /// Drop the current connection, failing whatever is still pending on it
    async fn teardown(&self) -> bool {
        let active = self.inner.connection.write().await.take();
        let Some(active) = active else {
            return false;
        };
        active.reader.abort();
        active.connection.fail_pending().await;
        if let Err(e) = active.connection.session.close().await {
            warn!("Error closing session of MCP server {}: {}", self.name(), e);
        }
        true
    }

    /// Move to `to` if still on `generation` and currently in one of `from`
    fn transition(
        &self,
        generation: u64,
        to: ConnectionState,
        from: &[ConnectionState],
    ) -> bool {
        let inner = &self.inner;
        let mut previous = None;
        let changed = inner.state.send_if_modified(|state| {
            if inner.generation.load(Ordering::Acquire) != generation || !from.contains(state) {
                return false;
            }
            previous = Some(*state);
            *state = to;
            true
        });
        if let Some(previous) = previous {
            debug!("MCP server {}: {} -> {}", self.name(), previous, to);
        }
        changed
    }

    async fn start_failed(&self, generation: u64, error: SwitchboardError) -> SwitchboardError {
        if self.generation() == generation {
            warn!("Failed to start MCP server {}: {}", self.name(), error);
            *self.inner.last_error.write().await = Some(error.to_string());
            let to = if matches!(error, SwitchboardError::ConnectionClosed { .. }) {
                ConnectionState::Closed
            } else {
                ConnectionState::Degraded
            };
            self.transition(
                generation,
                to,
                &[ConnectionState::Connecting, ConnectionState::Handshaking],
            );
        }
        error
    }

    async fn degrade(&self, generation: u64, reason: String) {
        if self.transition(
            generation,
            ConnectionState::Degraded,
            &[ConnectionState::Ready],
        ) {
            warn!("MCP server {} degraded: {}", self.name(), reason);
            *self.inner.last_error.write().await = Some(reason);
        }
    }

    async fn transport_closed(&self, connection: &Connection) {
        if self.transition(
            connection.generation,
            ConnectionState::Closed,
            &[
                ConnectionState::Ready,
                ConnectionState::Degraded,
                ConnectionState::Handshaking,
                ConnectionState::Connecting,
            ],
        ) {
            warn!("MCP server {} closed its connection", self.name());
            *self.inner.last_error.write().await =
                Some("connection closed by server".to_string());
        }
    }
}

async fn receive_loop(handle: Weak<ClientInner>, connection: Arc<Connection>, mut frames: FrameStream) {
    while let Some(item) = frames.next().await {
        let Some(inner) = handle.upgrade() else {
            break;
        };
        let client = McpClient { inner };
        match item {
            Ok(frame) => client.dispatch(&connection, &frame).await,
            Err(FrameError::Oversized) => {
                client
                    .degrade(connection.generation, FrameError::Oversized.to_string())
                    .await;
            }
            Err(FrameError::Io(e)) => {
                warn!("Transport of MCP server {} failed: {}", client.name(), e);
                break;
            }
        }
    }

    connection.fail_pending().await;
    if let Some(inner) = handle.upgrade() {
        McpClient { inner }.transport_closed(&connection).await;
    }
    if let Err(e) = connection.session.close().await {
        debug!("[{}] error reaping session: {}", connection.session.label(), e);
    }
}
