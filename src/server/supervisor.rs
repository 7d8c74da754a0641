use super::manager::{ManagerInner, ServerManager};
use super::registry::ServerEntry;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Follow one server's state and tool changes: keep the catalog current and
/// redial the server with backoff when it degrades or drops.
pub(crate) async fn supervise(
    manager: Weak<ManagerInner>,
    entry: Arc<ServerEntry>,
    token: CancellationToken,
) {
    let mut states = entry.client.subscribe();
    let mut revisions = entry.client.subscribe_tools();

    let initial = *states.borrow_and_update();
    if initial.needs_restart()
        && let Some(inner) = manager.upgrade()
    {
        reconnect(ServerManager::from_inner(inner), &entry, &token).await;
        let _ = states.borrow_and_update();
    }

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                let Some(inner) = manager.upgrade() else {
                    break;
                };
                let manager = ServerManager::from_inner(inner);
                debug!("Supervisor saw MCP server {} in state {}", entry.name(), state);
                manager.refresh_catalog().await;

                if state.needs_restart() {
                    reconnect(manager, &entry, &token).await;
                    // Transitions made while redialing are already handled
                    let _ = states.borrow_and_update();
                }
            }
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                let _ = revisions.borrow_and_update();
                let Some(inner) = manager.upgrade() else {
                    break;
                };
                ServerManager::from_inner(inner).refresh_catalog().await;
            }
        }
    }

    debug!("Supervisor for MCP server {} stopped", entry.name());
}

async fn reconnect(manager: ServerManager, entry: &ServerEntry, token: &CancellationToken) {
    let policy = manager.config().reconnect.clone();
    if !policy.enabled {
        return;
    }

    loop {
        let attempt = entry.attempts() + 1;
        if attempt > policy.max_attempts {
            if attempt == policy.max_attempts + 1 {
                error!(
                    "Giving up on MCP server {} after {} reconnect attempts",
                    entry.name(),
                    policy.max_attempts
                );
                entry.reconnect_attempts.store(attempt, Ordering::Release);
            }
            return;
        }

        let delay = policy.delay_for_attempt(attempt);
        info!(
            "Reconnecting MCP server {} in {:?} (attempt {}/{})",
            entry.name(),
            delay,
            attempt,
            policy.max_attempts
        );
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let _lifecycle = entry.lifecycle.lock().await;
        if token.is_cancelled() || !entry.client.state().needs_restart() {
            return;
        }
        entry.reconnect_attempts.store(attempt, Ordering::Release);

        match manager.bring_up(&entry.client).await {
            Ok(()) => {
                info!("Reconnected MCP server {}", entry.name());
                entry.reconnect_attempts.store(0, Ordering::Release);
                manager.refresh_catalog().await;
                return;
            }
            Err(e) => warn!(
                "Reconnect attempt {} for MCP server {} failed: {}",
                attempt,
                entry.name(),
                e
            ),
        }
    }
}
