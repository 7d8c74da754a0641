use super::session::TransportSession;
use crate::config::parse_remote_address;
use crate::error::{Result, SwitchboardError};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::info;

/// Connect to a remote server speaking newline-framed JSON-RPC over TCP
pub async fn connect(label: &str, address: &str, grace: Duration) -> Result<TransportSession> {
    let (host, port) = parse_remote_address(address).ok_or_else(|| {
        SwitchboardError::configuration(
            vec![label.to_string()],
            format!("invalid remote address '{}'", address),
        )
    })?;

    info!("Connecting to remote MCP server {} at {}:{}", label, host, port);

    let stream = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| SwitchboardError::LaunchFailed {
            server: label.to_string(),
            source: e,
        })?;
    stream.set_nodelay(true)?;

    let (read, write) = stream.into_split();
    Ok(TransportSession::from_io(label, read, write, grace))
}
