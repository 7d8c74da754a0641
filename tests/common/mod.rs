#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use mcp_switchboard::{
    ConnectionState, ServerManager,
    api::{build_router, handlers::ApiState},
    config::{McpConfig, ReconnectConfig, ServerDefinition},
    error::{Result, SwitchboardError},
    transport::{SessionFactory, TransportSession},
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::Notify;

// ──────────────────────────────────────────────
// Fake MCP servers (in-memory, no processes)
// ──────────────────────────────────────────────

/// Behaviour of one fake server
#[derive(Clone)]
pub struct FakeServer {
    pub tools: Vec<Value>,
    pub protocol_version: String,
    /// When false, `initialize` is never answered
    pub answers_handshake: bool,
    /// When false, `tools/list` is never answered
    pub answers_tools_list: bool,
}

impl FakeServer {
    /// A server exposing the named tools. `search` requires `{query: string}`,
    /// every other tool accepts any object.
    pub fn with_tools(names: &[&str]) -> Self {
        let tools = names
            .iter()
            .map(|name| {
                let schema = if *name == "search" {
                    json!({
                        "type": "object",
                        "properties": {"query": {"type": "string"}},
                        "required": ["query"]
                    })
                } else {
                    json!({"type": "object"})
                };
                json!({
                    "name": name,
                    "description": format!("Fake tool {}", name),
                    "inputSchema": schema
                })
            })
            .collect();

        Self {
            tools,
            protocol_version: "2025-06-18".to_string(),
            answers_handshake: true,
            answers_tools_list: true,
        }
    }

    pub fn silent() -> Self {
        Self {
            answers_handshake: false,
            ..Self::with_tools(&[])
        }
    }

    /// Completes the handshake, then never lists its tools
    pub fn stalls_discovery() -> Self {
        Self {
            answers_tools_list: false,
            ..Self::with_tools(&["search"])
        }
    }
}

/// Knobs and counters shared by every connection to one fake server
#[derive(Default)]
pub struct Control {
    /// Write one unparseable frame
    pub garbage: Notify,
    /// Drop the connection
    pub hangup: Notify,
    /// `tools/call` requests received
    pub calls: AtomicUsize,
}

/// Session factory backed by in-memory fake servers
#[derive(Default)]
pub struct FakeFactory {
    servers: Mutex<HashMap<String, FakeServer>>,
    controls: Mutex<HashMap<String, Arc<Control>>>,
    opens: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, usize>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, name: &str, server: FakeServer) {
        self.servers
            .lock()
            .unwrap()
            .insert(name.to_string(), server);
    }

    /// Make the next `count` opens of `name` fail to launch
    pub fn fail_opens(&self, name: &str, count: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(name.to_string(), count);
    }

    pub fn opens(&self, name: &str) -> usize {
        self.opens.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn control(&self, name: &str) -> Arc<Control> {
        self.controls
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn open(&self, definition: &ServerDefinition) -> Result<TransportSession> {
        let name = definition.name.clone();
        *self.opens.lock().unwrap().entry(name.clone()).or_default() += 1;

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&name)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(SwitchboardError::LaunchFailed {
                    server: name,
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "fake launch failure"),
                });
            }
        }

        let server = self
            .servers
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .unwrap_or_else(|| FakeServer::with_tools(&[]));
        let control = self.control(&name);

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run_fake_server(name.clone(), server, server_io, control));

        let (read, write) = tokio::io::split(client_io);
        Ok(TransportSession::from_io(
            name,
            read,
            write,
            Duration::from_millis(100),
        ))
    }
}

async fn run_fake_server(name: String, server: FakeServer, io: DuplexStream, control: Arc<Control>) {
    let (read, mut write) = tokio::io::split(io);
    let mut lines = BufReader::new(read).lines();

    loop {
        tokio::select! {
            _ = control.hangup.notified() => break,
            _ = control.garbage.notified() => {
                if write.write_all(b"%%% not json %%%\n").await.is_err() {
                    break;
                }
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    break;
                };
                let Ok(message) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                if let Some(reply) = respond(&name, &server, &control, &message) {
                    let frame = format!("{}\n", reply);
                    if write.write_all(frame.as_bytes()).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

fn respond(name: &str, server: &FakeServer, control: &Control, message: &Value) -> Option<Value> {
    let id = message.get("id")?.clone();
    let method = message.get("method")?.as_str()?;

    let result = match method {
        "initialize" => {
            if !server.answers_handshake {
                return None;
            }
            json!({
                "protocolVersion": server.protocol_version,
                "capabilities": {"tools": {"listChanged": true}},
                "serverInfo": {"name": name, "version": "0.0.1"}
            })
        }
        "ping" => json!({}),
        "tools/list" => {
            if !server.answers_tools_list {
                return None;
            }
            json!({ "tools": server.tools })
        }
        "tools/call" => {
            control.calls.fetch_add(1, Ordering::SeqCst);
            let tool = message["params"]["name"].as_str().unwrap_or_default();
            match tool {
                "hang" => return None,
                "fail" => json!({
                    "content": [{"type": "text", "text": "fake failure"}],
                    "isError": true
                }),
                _ => json!({
                    "content": [{
                        "type": "text",
                        "text": format!("{}:{}:{}", name, tool, message["params"]["arguments"])
                    }],
                    "structuredContent": {"server": name, "tool": tool}
                }),
            }
        }
        other => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("unknown method {}", other)}
            }));
        }
    };

    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

// ──────────────────────────────────────────────
// Shared helpers
// ──────────────────────────────────────────────

/// Protocol settings with reconnects off, so tests control every restart
pub fn test_config() -> McpConfig {
    McpConfig {
        request_timeout_secs: 2,
        startup_timeout_secs: 5,
        reconnect: ReconnectConfig::disabled(),
        ..McpConfig::default()
    }
}

pub fn definition(name: &str) -> ServerDefinition {
    ServerDefinition::local(name, "fake-mcp-server", vec![])
}

pub fn manager_with(factory: &Arc<FakeFactory>, config: McpConfig) -> ServerManager {
    ServerManager::new(config, factory.clone())
}

/// Poll until the server reaches `state`
pub async fn wait_for_state(manager: &ServerManager, name: &str, state: ConnectionState) {
    for _ in 0..500 {
        if manager.server_status(name).await.unwrap().client.state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server {} never reached state {}", name, state);
}

/// Build the gateway router around a started manager (no HTTP server, uses tower::oneshot).
pub fn build_test_app(manager: &ServerManager) -> Router {
    build_router(ApiState {
        manager: manager.clone(),
    })
}

/// Helper to extract JSON from a response body.
pub async fn response_json(response: axum::http::Response<axum::body::Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
