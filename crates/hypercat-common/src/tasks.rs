//! Background work that outlives the response it belongs to.
//!
//! An event handler returns its response as soon as it has one and hands any
//! follow-up work (cache writes) to a [`WaitUntil`]. The runtime keeps the
//! matching [`PendingWork`] and settles it before tearing the event down, so
//! the caller never waits on the background work.

use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Create a linked registration handle and pending-work collector.
pub fn extendable() -> (WaitUntil, PendingWork) {
    let (tx, rx) = mpsc::unbounded_channel();
    (WaitUntil { tx }, PendingWork { rx })
}

/// Registers background work against an event.
#[derive(Debug, Clone)]
pub struct WaitUntil {
    tx: mpsc::UnboundedSender<JoinHandle<()>>,
}

impl WaitUntil {
    /// Spawn `work` and extend the event's lifetime until it completes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        if self.tx.send(handle).is_err() {
            trace!("Pending work already settled; task runs detached");
        }
    }
}

/// Outcome of settling an event's background work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettleReport {
    /// Tasks that ran to completion.
    pub completed: usize,
    /// Tasks that panicked or were cancelled.
    pub failed: usize,
}

/// Collects background work registered through [`WaitUntil`].
#[derive(Debug)]
pub struct PendingWork {
    rx: mpsc::UnboundedReceiver<JoinHandle<()>>,
}

impl PendingWork {
    /// Await every registered task, including tasks registered while settling.
    pub async fn settle(mut self) -> SettleReport {
        let mut report = SettleReport::default();

        while let Ok(handle) = self.rx.try_recv() {
            match handle.await {
                Ok(()) => report.completed += 1,
                Err(e) => {
                    warn!(error = %e, "Background task did not complete");
                    report.failed += 1;
                }
            }
        }

        report
    }
}
