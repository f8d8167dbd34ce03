//! Background execution of work units.
//!
//! A bounded queue feeds a single worker task, so at most one unit runs
//! at a time and enqueueing is non-blocking: when the queue is full the
//! caller is told and can fall back to its retry path. Every accepted
//! unit produces exactly one completion report, including units that
//! panic.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::store::EndpointId;

/// A unit of background work bound to one endpoint.
///
/// `mark_starting` and `mark_completion_queued` bracket `execute` and
/// let the unit keep its own lifecycle bookkeeping; the dispatcher calls
/// them in that order exactly once per accepted unit.
#[async_trait]
pub trait WorkUnit: Send + 'static {
    fn endpoint(&self) -> EndpointId;

    /// Short human-readable label for logs.
    fn describe(&self) -> String;

    fn mark_starting(&mut self) {}

    fn mark_completion_queued(&mut self) {}

    async fn execute(&mut self) -> Result<()>;
}

/// Outcome of one work unit, reported back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub endpoint: EndpointId,
    pub succeeded: bool,
}

/// Handle to the background worker.
pub struct Dispatcher {
    tx: mpsc::Sender<Box<dyn WorkUnit>>,
    worker: JoinHandle<()>,
}

impl Dispatcher {
    /// Start the worker. Completions for every accepted unit are sent on
    /// `completions`.
    pub fn spawn(capacity: usize, completions: mpsc::UnboundedSender<Completion>) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let worker = tokio::spawn(worker_loop(rx, completions));
        Dispatcher { tx, worker }
    }

    /// Hand a unit to the worker without blocking.
    ///
    /// Returns false when the queue is full (or the worker is gone); the
    /// unit is dropped and the caller is expected to retry later.
    pub fn enqueue(&self, unit: Box<dyn WorkUnit>) -> bool {
        let label = unit.describe();
        match self.tx.try_send(unit) {
            Ok(()) => true,
            Err(err) => {
                warn!("failed to queue {}: {}", label, err);
                false
            }
        }
    }

    /// Stop accepting new units, finish the ones already queued, then
    /// return.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.worker.await;
    }
}

async fn worker_loop(
    mut rx: mpsc::Receiver<Box<dyn WorkUnit>>,
    completions: mpsc::UnboundedSender<Completion>,
) {
    while let Some(mut unit) = rx.recv().await {
        let endpoint = unit.endpoint();
        let label = unit.describe();
        let completions_for_unit = completions.clone();

        // The unit runs in its own task so a panic inside it cannot take
        // the worker down; the join error below turns it into a failure
        // report instead.
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            unit.mark_starting();
            let result = unit.execute().await;
            unit.mark_completion_queued();
            let succeeded = match result {
                Ok(()) => true,
                Err(err) => {
                    error!("work unit failed: {err:#}");
                    false
                }
            };
            debug!(
                "{} finished in {}ms (succeeded: {})",
                unit.describe(),
                started.elapsed().as_millis(),
                succeeded
            );
            let _ = completions_for_unit.send(Completion { endpoint, succeeded });
        });

        if let Err(join_err) = handle.await {
            if join_err.is_panic() {
                error!("work unit panicked: {}", label);
            }
            let _ = completions.send(Completion {
                endpoint,
                succeeded: false,
            });
        }
    }
}
