//! Periodic presence polling.
//!
//! [`PresenceTracker`] owns one background task that, on every tick, lists
//! the overlay's peers, queries each connection status and hands a snapshot
//! to the caller. It never writes to the contact store itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use parley_shared::types::PeerKey;

use crate::transport::OverlayTransport;

/// Public key -> is online, for every peer enumerable at tick time.
pub type PresenceSnapshot = HashMap<PeerKey, bool>;

pub struct PresenceTracker {
    transport: Arc<dyn OverlayTransport>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceTracker {
    pub fn new(transport: Arc<dyn OverlayTransport>) -> Self {
        Self {
            transport,
            task: Mutex::new(None),
        }
    }

    /// Start polling every `interval`, invoking `on_update` with each
    /// snapshot. A running poll loop is cancelled and replaced.
    ///
    /// The first snapshot is taken immediately.
    pub fn start_polling<F>(&self, interval: Duration, on_update: F)
    where
        F: Fn(PresenceSnapshot) + Send + Sync + 'static,
    {
        let transport = Arc::clone(&self.transport);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let snapshot = poll_transport(transport.as_ref()).await;
                on_update(snapshot);
            }
        });

        let mut task = lock_task(&self.task);
        if let Some(previous) = task.replace(handle) {
            debug!("Restarting presence polling");
            previous.abort();
        }
        info!(interval_secs = interval.as_secs_f64(), "Presence polling started");
    }

    /// Cancel the poll loop. Safe to call when not running. An in-progress
    /// status query is dropped, not awaited.
    pub fn stop_polling(&self) {
        if let Some(task) = lock_task(&self.task).take() {
            task.abort();
            info!("Presence polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock_task(&self.task)
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Take a single snapshot outside the poll loop.
    pub async fn poll_once(&self) -> PresenceSnapshot {
        poll_transport(self.transport.as_ref()).await
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        if let Some(task) = lock_task(&self.task).take() {
            task.abort();
        }
    }
}

// A poisoned lock only means a previous holder panicked mid-swap; the
// Option inside is still valid.
fn lock_task(task: &Mutex<Option<JoinHandle<()>>>) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
    task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn poll_transport(transport: &dyn OverlayTransport) -> PresenceSnapshot {
    let handles = match transport.list_peers().await {
        Ok(handles) => handles,
        Err(e) => {
            warn!(error = %e, "Failed to enumerate peers, reporting empty snapshot");
            return PresenceSnapshot::new();
        }
    };

    let queries = handles.into_iter().map(|handle| async move {
        let key = transport.peer_key(handle).await?;
        let status = transport.connection_status(handle).await;
        Some((key, status.is_online()))
    });

    let snapshot: PresenceSnapshot = join_all(queries).await.into_iter().flatten().collect();
    debug!(
        peers = snapshot.len(),
        online = snapshot.values().filter(|online| **online).count(),
        "Presence snapshot"
    );
    snapshot
}
