use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::events::SessionSnapshot;

/// Control surface for a running engine; cheap to clone.
#[derive(Clone)]
pub struct EngineHandle {
    stop: CancellationToken,
    interrupt: Arc<Notify>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl EngineHandle {
    pub(crate) fn new(
        stop: CancellationToken,
        interrupt: Arc<Notify>,
        snapshot: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        Self {
            stop,
            interrupt,
            snapshot,
        }
    }

    /// Ask the engine to terminate at its next state boundary
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            info!("stop requested");
        }
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Cut the reply currently playing short. No effect when nothing plays.
    pub fn interrupt(&self) {
        self.interrupt.notify_waiters();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }
}
