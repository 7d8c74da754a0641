use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mcp_switchboard::server::ServerManager;
use mcp_switchboard::{api, config};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mcp-switchboard")]
#[command(about = "Aggregate tools from many MCP servers behind one namespace", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", env = "SWITCHBOARD_CONFIG")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Override log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start all servers and serve the HTTP gateway (default)
    Serve,
    /// Start all servers, print the aggregated tool catalog as JSON, and exit
    Tools,
    /// Start all servers, invoke one tool, print the result, and exit
    Call {
        /// Qualified tool name, `server.tool`
        tool: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = config::load_config(&cli.config).with_context(|| {
        format!(
            "Failed to load configuration from: {}",
            cli.config.display()
        )
    })?;

    if let Some(log_level) = cli.log_level {
        config.logging.level = log_level;
    }
    if let Some(log_format) = cli.log_format {
        config.logging.format = log_format;
    }

    init_logging(&config.logging)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            print_banner(&config);
            info!("Starting mcp-switchboard...");
            api::start_server(config).await?;
        }
        Command::Tools => {
            let manager = start_manager(&config).await?;
            let catalog = manager.aggregated_catalog().await;
            let printed = serde_json::to_string_pretty(&*catalog);
            manager.shutdown().await;
            println!("{}", printed?);
        }
        Command::Call { tool, arguments } => {
            let arguments: serde_json::Value = serde_json::from_str(&arguments)
                .context("Tool arguments must be valid JSON")?;
            let manager = start_manager(&config).await?;
            let result = manager.call_tool(&tool, arguments).await;
            manager.shutdown().await;
            let response = result.with_context(|| format!("Call to {} failed", tool))?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}

async fn start_manager(config: &config::AppConfig) -> Result<ServerManager> {
    let manager = ServerManager::with_process_factory(config.mcp.clone());
    let report = manager.start(config.servers.clone()).await?;
    for failure in &report.failed {
        warn!("Server {} is unavailable: {}", failure.server, failure.error);
    }
    Ok(manager)
}

fn init_logging(config: &config::LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // Logs go to stderr so `tools` and `call` output stays parseable
    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

fn print_banner(config: &config::AppConfig) {
    let version = env!("CARGO_PKG_VERSION");
    let width = 59usize;
    let border = "═".repeat(width + 2);
    let line = |content: &str| {
        info!("║ {:width$} ║", content, width = width);
    };

    info!("╔{}╗", border);
    line("MCP-SWITCHBOARD");
    line(&format!("MCP connection and routing layer v{}", version));
    info!("╚{}╝", border);
    info!("");
    info!("Configuration:");
    info!("  → Address: {}:{}", config.http.host, config.http.port);
    info!("  → Log Level: {}", config.logging.level);
    info!("  → Log Format: {}", config.logging.format);
    info!("  → MCP Servers: {}", config.servers.len());
    info!(
        "  → Collision Policy: {:?}",
        config.mcp.collision_policy
    );
    info!("");
}
