//! Periodic sweep of expired and surplus in-memory state.

use std::sync::Weak;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::EngineInner;

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Cache entries past their TTL.
    pub expired_cache_entries: usize,
    /// Plans dropped to bring the plan table back to capacity.
    pub plans_trimmed: usize,
    /// Slow queries dropped to bring the history back to its bound.
    pub slow_queries_trimmed: usize,
}

pub(crate) enum MaintenanceMessage {
    Trigger,
    Shutdown,
}

pub(crate) struct MaintenanceTask {
    sender: UnboundedSender<MaintenanceMessage>,
    handle: JoinHandle<()>,
}

impl MaintenanceTask {
    /// Spawns the sweep loop on the current runtime. Returns `None` outside
    /// a runtime; the host can still call `run_maintenance` itself.
    pub(crate) fn spawn(engine: Weak<EngineInner>, interval: Duration) -> Option<Self> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("engine.maintenance.no_runtime");
                return None;
            }
        };
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = runtime.spawn(maintenance_loop(engine, receiver, interval));
        debug!(interval_ms = interval.as_millis() as u64, "engine.maintenance.started");
        Some(Self { sender, handle })
    }

    pub(crate) fn trigger(&self) -> bool {
        self.sender.send(MaintenanceMessage::Trigger).is_ok()
    }

    pub(crate) async fn shutdown(self) {
        if self.sender.send(MaintenanceMessage::Shutdown).is_err() {
            self.handle.abort();
        }
        if let Err(err) = self.handle.await {
            if !err.is_cancelled() {
                warn!(error = %err, "engine.maintenance.join_failed");
            }
        }
        debug!("engine.maintenance.stopped");
    }
}

async fn maintenance_loop(
    engine: Weak<EngineInner>,
    mut receiver: UnboundedReceiver<MaintenanceMessage>,
    interval: Duration,
) {
    loop {
        match tokio::time::timeout(interval, receiver.recv()).await {
            Ok(Some(MaintenanceMessage::Trigger)) | Err(_) => {
                // The engine is gone once every handle has been dropped.
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.run_maintenance();
            }
            Ok(Some(MaintenanceMessage::Shutdown)) | Ok(None) => break,
        }
    }
}
