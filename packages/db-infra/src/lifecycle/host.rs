//! Link between the migration task and the process that hosts it.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Message a background task sends to ask the host to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopRequest {
    pub source: &'static str,
}

/// Shutdown controller shared by the host and its background tasks.
///
/// Two one-way channels: the host tells tasks it is stopping through
/// [`stopping`](Self::stopping), and a task asks the host to stop through
/// [`stop_application`](Self::stop_application).
#[derive(Debug, Clone)]
pub struct HostLifetime {
    stopping: CancellationToken,
    stop_tx: Arc<watch::Sender<Option<StopRequest>>>,
}

impl Default for HostLifetime {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLifetime {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(None);
        Self {
            stopping: CancellationToken::new(),
            stop_tx: Arc::new(stop_tx),
        }
    }

    /// Token cancelled when the host begins shutting down.
    pub fn stopping(&self) -> CancellationToken {
        self.stopping.clone()
    }

    /// Host side: start shutting down (e.g. on Ctrl-C).
    pub fn begin_shutdown(&self) {
        if !self.stopping.is_cancelled() {
            info!("host=stopping");
        }
        self.stopping.cancel();
    }

    /// Task side: ask the host to stop gracefully. Only the first request
    /// is kept.
    pub fn stop_application(&self, source: &'static str) {
        let sent = self.stop_tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(StopRequest { source });
            true
        });
        if sent {
            info!(source, "host=stop_requested");
        }
    }

    pub fn stop_request(&self) -> Option<StopRequest> {
        *self.stop_tx.borrow()
    }

    /// Resolves with the first stop request sent by any task.
    pub async fn wait_for_stop(&self) -> Option<StopRequest> {
        let mut rx = self.stop_tx.subscribe();
        let request = rx
            .wait_for(|slot: &Option<StopRequest>| slot.is_some())
            .await
            .ok()
            .and_then(|seen| *seen);
        request
    }
}
