use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub servers: Vec<ServerDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Protocol and lifecycle tuning shared by every server connection
#[derive(Debug, Clone, Deserialize)]
pub struct McpConfig {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default)]
    pub collision_policy: CollisionPolicy,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_protocol_version() -> String {
    crate::mcp::LATEST_PROTOCOL_VERSION.to_string()
}

fn default_handshake_timeout_secs() -> u64 {
    30
}

fn default_startup_timeout_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            startup_timeout_secs: default_startup_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            collision_policy: CollisionPolicy::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl McpConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// What happens when several Ready servers expose the same tool name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Withhold every colliding tool
    #[default]
    RejectAll,
    /// Keep the earliest-registered server's tool, withhold the others
    RejectLater,
}

/// Exponential backoff for redialing failed servers
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_reconnect_enabled() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: default_reconnect_enabled(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before the given (1-based) reconnect attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// One configured MCP server
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerDefinition {
    pub name: String,
    #[serde(flatten)]
    pub launch: LaunchSpec,
    #[serde(default)]
    pub startup_timeout_secs: Option<u64>,
    /// Server capabilities that must be present after the handshake
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub tools: Option<ToolFilter>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ServerDefinition {
    pub fn local(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(
            name,
            LaunchSpec::Local {
                command: command.into(),
                args,
                env: HashMap::new(),
                cwd: None,
            },
        )
    }

    pub fn remote(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self::new(
            name,
            LaunchSpec::Remote {
                address: address.into(),
            },
        )
    }

    fn new(name: impl Into<String>, launch: LaunchSpec) -> Self {
        Self {
            name: name.into(),
            launch,
            startup_timeout_secs: None,
            capabilities: Vec::new(),
            tools: None,
            enabled: true,
        }
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn with_tool_filter(mut self, filter: ToolFilter) -> Self {
        self.tools = Some(filter);
        self
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Startup timeout for this server, falling back to the shared default
    pub fn startup_timeout(&self, default: Duration) -> Duration {
        self.startup_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(default)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LaunchSpec {
    Local {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    Remote {
        address: String,
    },
}

impl LaunchSpec {
    pub fn kind(&self) -> TransportKind {
        match self {
            LaunchSpec::Local { .. } => TransportKind::Local,
            LaunchSpec::Remote { .. } => TransportKind::Remote,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Local,
    Remote,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportKind::Local => "local",
            TransportKind::Remote => "remote",
        };
        write!(f, "{}", s)
    }
}

/// Split a remote endpoint (`host:port`, optionally `tcp://host:port`) into its parts
pub fn parse_remote_address(address: &str) -> Option<(String, u16)> {
    let trimmed = address.trim();
    let without_scheme = trimmed.strip_prefix("tcp://").unwrap_or(trimmed);
    let (host, port) = without_scheme.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    let port = port.parse::<u16>().ok().filter(|p| *p != 0)?;
    Some((host.to_string(), port))
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolFilter {
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_doubles_and_caps() {
        let policy = ReconnectConfig {
            enabled: true,
            max_attempts: 10,
            base_delay_ms: 500,
            max_delay_ms: 3000,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(3000));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(3000));
    }

    #[test]
    fn test_parse_remote_address() {
        assert_eq!(
            parse_remote_address("tcp://127.0.0.1:7001"),
            Some(("127.0.0.1".to_string(), 7001))
        );
        assert_eq!(
            parse_remote_address("localhost:9000"),
            Some(("localhost".to_string(), 9000))
        );
        assert_eq!(
            parse_remote_address("[::1]:8080"),
            Some(("::1".to_string(), 8080))
        );
        assert_eq!(parse_remote_address("localhost"), None);
        assert_eq!(parse_remote_address(":9000"), None);
        assert_eq!(parse_remote_address("host:notaport"), None);
        assert_eq!(parse_remote_address("host:0"), None);
    }

    #[test]
    fn test_startup_timeout_falls_back_to_default() {
        let definition = ServerDefinition::local("srv", "cat", vec![]);
        assert_eq!(
            definition.startup_timeout(Duration::from_secs(60)),
            Duration::from_secs(60)
        );

        let definition = definition.with_startup_timeout(Duration::from_secs(5));
        assert_eq!(
            definition.startup_timeout(Duration::from_secs(60)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_collision_policy_deserializes_snake_case() {
        let policy: CollisionPolicy = serde_json::from_str("\"reject_later\"").unwrap();
        assert_eq!(policy, CollisionPolicy::RejectLater);
        assert_eq!(CollisionPolicy::default(), CollisionPolicy::RejectAll);
    }
}
