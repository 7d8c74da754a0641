use super::local::{self, LocalLaunch};
use super::remote;
use super::session::TransportSession;
use crate::config::{LaunchSpec, ServerDefinition};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Opens transport sessions for server definitions.
///
/// The manager goes through this seam for every (re)connect, so tests can
/// substitute in-memory servers for real processes.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, definition: &ServerDefinition) -> Result<TransportSession>;
}

/// Spawns local servers as child processes and dials remote ones over TCP
#[derive(Debug, Clone)]
pub struct ProcessSessionFactory {
    grace: Duration,
}

impl ProcessSessionFactory {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }
}

#[async_trait]
impl SessionFactory for ProcessSessionFactory {
    async fn open(&self, definition: &ServerDefinition) -> Result<TransportSession> {
        match &definition.launch {
            LaunchSpec::Local {
                command,
                args,
                env,
                cwd,
            } => {
                let launch = LocalLaunch {
                    command: command.clone(),
                    args: args.clone(),
                    env: env.clone(),
                    cwd: cwd.clone(),
                };
                local::spawn(&definition.name, &launch, self.grace)
            }
            LaunchSpec::Remote { address } => {
                remote::connect(&definition.name, address, self.grace).await
            }
        }
    }
}
