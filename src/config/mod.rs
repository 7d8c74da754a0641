pub mod types;

use crate::error::{Result as SwitchboardResult, SwitchboardError};
use ::config::{Config, Environment, File};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
pub use types::*;

/// Load configuration from a TOML file, with `SWITCHBOARD__*` environment overrides
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path = path.as_ref();

    let config = Config::builder()
        .add_source(File::from(path))
        .add_source(Environment::with_prefix("SWITCHBOARD").separator("__"))
        .build()
        .with_context(|| format!("Failed to load config from: {}", path.display()))?;

    let app_config: AppConfig = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// Validate the loaded configuration
pub fn validate_config(config: &AppConfig) -> Result<()> {
    validate_definitions(&config.servers)?;

    // Validate log level
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        anyhow::bail!(
            "Invalid log level '{}'. Valid levels: {}",
            config.logging.level,
            valid_levels.join(", ")
        );
    }

    // Validate log format
    let valid_formats = ["pretty", "json"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        anyhow::bail!(
            "Invalid log format '{}'. Valid formats: {}",
            config.logging.format,
            valid_formats.join(", ")
        );
    }

    if config.mcp.handshake_timeout_secs == 0
        || config.mcp.startup_timeout_secs == 0
        || config.mcp.request_timeout_secs == 0
    {
        anyhow::bail!("MCP timeouts must be greater than zero");
    }

    if config.mcp.reconnect.enabled && config.mcp.reconnect.max_attempts == 0 {
        anyhow::bail!("mcp.reconnect.max_attempts must be at least 1 when reconnect is enabled");
    }

    Ok(())
}

/// Check server definitions for missing launch information and duplicate names.
///
/// Every problem is collected into a single configuration error naming the
/// offending servers.
pub fn validate_definitions(definitions: &[ServerDefinition]) -> SwitchboardResult<()> {
    let mut problems = Vec::new();
    let mut offenders = Vec::new();
    let mut names = HashSet::new();

    for definition in definitions {
        let name = definition.name.as_str();
        let mut flag = |message: String| {
            problems.push(message);
            if !offenders.iter().any(|o: &String| o == name) {
                offenders.push(name.to_string());
            }
        };

        if name.trim().is_empty() {
            flag("server name cannot be empty".to_string());
        } else if name.contains('.') || name.contains('/') || name.chars().any(char::is_whitespace)
        {
            flag(format!(
                "server name '{}' contains invalid characters (., / or whitespace)",
                name
            ));
        }

        if !names.insert(name) {
            flag(format!("duplicate server name '{}'", name));
        }

        match &definition.launch {
            LaunchSpec::Local { command, .. } => {
                if command.trim().is_empty() {
                    flag(format!("server '{}' has an empty launch command", name));
                }
            }
            LaunchSpec::Remote { address } => {
                if parse_remote_address(address).is_none() {
                    flag(format!(
                        "server '{}' has an invalid remote address '{}' (expected host:port)",
                        name, address
                    ));
                }
            }
        }

        if definition.startup_timeout_secs == Some(0) {
            flag(format!("server '{}' has a zero startup timeout", name));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(SwitchboardError::configuration(offenders, problems.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
[http]
host = "0.0.0.0"
port = 8080

[logging]
level = "debug"
format = "json"

[mcp]
request_timeout_secs = 15
collision_policy = "reject_later"

[mcp.reconnect]
max_attempts = 3

[[servers]]
name = "test-server"
type = "local"
command = "cat"
args = ["-u"]
cwd = "/tmp"
capabilities = ["tools"]

[[servers]]
name = "remote-server"
type = "remote"
address = "tcp://127.0.0.1:7001"
startup_timeout_secs = 5
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        temp_file.write_all(config_content.as_bytes()).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.http.host, "0.0.0.0");
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.mcp.request_timeout_secs, 15);
        assert_eq!(config.mcp.collision_policy, CollisionPolicy::RejectLater);
        assert_eq!(config.mcp.reconnect.max_attempts, 3);
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].name, "test-server");
        assert_eq!(config.servers[0].capabilities, vec!["tools".to_string()]);
        assert!(matches!(
            &config.servers[0].launch,
            LaunchSpec::Local { command, cwd: Some(_), .. } if command == "cat"
        ));
        assert_eq!(config.servers[1].startup_timeout_secs, Some(5));
    }

    #[test]
    fn test_load_config_with_defaults() {
        let config_content = r#"
[[servers]]
name = "test-server"
type = "local"
command = "cat"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        temp_file.write_all(config_content.as_bytes()).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.http.host, "127.0.0.1");
        assert_eq!(config.http.port, 3000);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.mcp.handshake_timeout_secs, 30);
        assert!(config.mcp.reconnect.enabled);
        assert!(config.servers[0].enabled);
        assert!(config.servers[0].tools.is_none());
    }

    #[test]
    fn test_load_config_rejects_bad_log_level() {
        let config_content = r#"
[logging]
level = "loud"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        temp_file.write_all(config_content.as_bytes()).unwrap();

        let err = load_config(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_validate_duplicate_names() {
        let definitions = vec![
            ServerDefinition::local("server1", "cat", vec![]),
            ServerDefinition::local("server1", "cat", vec![]),
        ];

        let err = validate_definitions(&definitions).unwrap_err();
        match err {
            SwitchboardError::Configuration { servers, message } => {
                assert_eq!(servers, vec!["server1".to_string()]);
                assert!(message.contains("duplicate server name"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_missing_launch_information() {
        let definitions = vec![
            ServerDefinition::local("no-command", "  ", vec![]),
            ServerDefinition::remote("no-port", "localhost"),
            ServerDefinition::local("fine", "cat", vec![]),
        ];

        let err = validate_definitions(&definitions).unwrap_err();
        match err {
            SwitchboardError::Configuration { servers, .. } => {
                assert_eq!(servers, vec!["no-command".to_string(), "no-port".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_invalid_name_characters() {
        let definitions = vec![ServerDefinition::local("my.server", "cat", vec![])];
        assert!(validate_definitions(&definitions).is_err());
    }

    #[test]
    fn test_validate_accepts_valid_definitions() {
        let definitions = vec![
            ServerDefinition::local("files", "cat", vec![]),
            ServerDefinition::remote("remote", "tcp://127.0.0.1:7001"),
        ];
        assert!(validate_definitions(&definitions).is_ok());
    }
}
