//! Background queue for service spawn side effects.
//!
//! Spawning a user service means running a shell or loading code, both
//! blocking. The broker never does that on a call-handling thread: it
//! hands a [`SpawnJob`] to a [`SpawnExecutor`] and returns.
//!
//! [`SpawnWorker`] is the production executor: one consumer task that runs
//! each job on the blocking pool and waits for it before taking the next,
//! so spawns are serialized relative to each other.
//!
//! ```text
//! execute(job) ──► mpsc ──► consumer task ──► spawn_blocking(job).await
//! execute_after(d, job) ──► sleep(d) ──┘
//! ```

use std::time::Duration;
use tokio::runtime::Handle as RuntimeHandle;
use tokio::sync::mpsc;

/// A unit of spawn work.
pub type SpawnJob = Box<dyn FnOnce() + Send + 'static>;

/// Runs spawn jobs off the calling thread, one at a time.
pub trait SpawnExecutor: Send + Sync {
    /// Queues `job`.
    fn execute(&self, job: SpawnJob);

    /// Queues `job` once `delay` has elapsed.
    fn execute_after(&self, delay: Duration, job: SpawnJob);
}

/// Single-worker executor on a tokio runtime.
#[derive(Debug, Clone)]
pub struct SpawnWorker {
    tx: mpsc::UnboundedSender<SpawnJob>,
    runtime: RuntimeHandle,
}

impl SpawnWorker {
    /// Starts the worker task on `runtime`.
    ///
    /// The worker stops once every clone of the returned value is dropped
    /// and the queue is drained.
    #[must_use]
    pub fn start(runtime: RuntimeHandle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(Self::run(rx));
        Self { tx, runtime }
    }

    async fn run(mut rx: mpsc::UnboundedReceiver<SpawnJob>) {
        tracing::debug!("spawn worker started");
        while let Some(job) = rx.recv().await {
            if let Err(e) = tokio::task::spawn_blocking(job).await {
                tracing::error!("spawn job failed: {e}");
            }
        }
        tracing::debug!("spawn worker stopped");
    }
}

impl SpawnExecutor for SpawnWorker {
    fn execute(&self, job: SpawnJob) {
        if self.tx.send(job).is_err() {
            tracing::warn!("spawn worker stopped, job dropped");
        }
    }

    fn execute_after(&self, delay: Duration, job: SpawnJob) {
        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(job).is_err() {
                tracing::warn!("spawn worker stopped, delayed job dropped");
            }
        });
    }
}
