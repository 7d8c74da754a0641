use super::session::TransportSession;
use crate::error::{Result, SwitchboardError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How to launch a local server process
#[derive(Debug, Clone)]
pub struct LocalLaunch {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

/// A spawned server process owned by its transport session
pub(crate) struct ChildProcess {
    child: Child,
    stderr_task: Option<JoinHandle<()>>,
}

impl ChildProcess {
    /// Wait up to `grace` for the process to exit on its own, then kill it.
    /// The process is always reaped.
    pub(crate) async fn terminate(mut self, label: &str, grace: Duration) {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => debug!("[{}] process exited: {}", label, status),
            Ok(Err(e)) => warn!("[{}] failed to wait for process: {}", label, e),
            Err(_) => {
                warn!(
                    "[{}] process did not exit within {:?}, killing it",
                    label, grace
                );
                if let Err(e) = self.child.kill().await {
                    warn!("[{}] failed to kill process: {}", label, e);
                }
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

/// Spawn a server process with its stdio wired to a new session
pub fn spawn(label: &str, launch: &LocalLaunch, grace: Duration) -> Result<TransportSession> {
    info!("Launching local MCP server: {}", label);
    debug!("Command: {} {}", launch.command, launch.args.join(" "));

    let mut cmd = Command::new(&launch.command);
    cmd.args(&launch.args)
        .envs(&launch.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &launch.cwd {
        cmd.current_dir(cwd);
    }

    let mut child = cmd.spawn().map_err(|e| SwitchboardError::LaunchFailed {
        server: label.to_string(),
        source: e,
    })?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(SwitchboardError::Internal(format!(
            "stdio of server '{}' was not captured",
            label
        )));
    };
    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(forward_stderr(label.to_string(), stderr)));

    if let Some(pid) = child.id() {
        debug!("[{}] spawned with pid {}", label, pid);
    }

    Ok(TransportSession::from_parts(
        label.to_string(),
        Box::pin(stdout),
        Box::pin(stdin),
        Some(ChildProcess { child, stderr_task }),
        grace,
    ))
}

async fn forward_stderr(label: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!("[{} stderr] {}", label, line),
            Ok(None) => break,
            Err(e) => {
                debug!("[{}] stderr closed: {}", label, e);
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use futures::StreamExt;

    const GRACE: Duration = Duration::from_millis(500);

    fn launch(command: &str, args: &[&str]) -> LocalLaunch {
        LocalLaunch {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    #[tokio::test]
    async fn test_cat_echoes_frames() {
        let session = spawn("cat", &launch("cat", &[]), GRACE).unwrap();
        let mut frames = session.take_frames().await.unwrap();

        session.send(r#"{"jsonrpc":"2.0","id":1}"#).await.unwrap();
        assert_eq!(
            frames.next().await.unwrap().unwrap(),
            r#"{"jsonrpc":"2.0","id":1}"#
        );

        session.close().await.unwrap();
        // cat exits once stdin closes, so the frame stream ends
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_environment_and_cwd_are_passed_verbatim() {
        let mut spec = launch("sh", &["-c", "echo \"$GREETING\"; pwd"]);
        spec.env
            .insert("GREETING".to_string(), "hello world".to_string());
        spec.cwd = Some(PathBuf::from("/"));

        let session = spawn("env", &spec, GRACE).unwrap();
        let mut frames = session.take_frames().await.unwrap();

        assert_eq!(frames.next().await.unwrap().unwrap(), "hello world");
        assert_eq!(frames.next().await.unwrap().unwrap(), "/");
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_kills_process_that_ignores_stdin() {
        let session = spawn("sleeper", &launch("sleep", &["30"]), Duration::from_millis(50)).unwrap();

        let started = std::time::Instant::now();
        session.close().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        // Second close has nothing left to tear down
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_binary_reports_launch_failure() {
        let result = spawn(
            "ghost",
            &launch("definitely-not-a-real-binary-xyz", &[]),
            GRACE,
        );
        assert!(matches!(
            result,
            Err(SwitchboardError::LaunchFailed { ref server, .. }) if server == "ghost"
        ));
    }
}
