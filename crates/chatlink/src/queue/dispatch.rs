//! Dispatch loop draining a work queue into a worker pool

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::WorkQueue;
use crate::worker::WorkerPool;

/// Depth above which the loop starts reporting queue backlog
const DEPTH_LOG_THRESHOLD: usize = 100;
/// Backlog is reported every this many items
const DEPTH_LOG_INTERVAL: usize = 1000;

/// Decides whether the downstream channel can take work right now
#[async_trait]
pub trait DispatchGate: Send + Sync {
    /// `true` while dispatching should hold off (e.g. mid-reconnect)
    fn is_paused(&self) -> bool;

    /// Resolve once the gate is open again
    async fn wait_until_open(&self);
}

/// Gate that never pauses
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGate;

#[async_trait]
impl DispatchGate for OpenGate {
    fn is_paused(&self) -> bool {
        false
    }

    async fn wait_until_open(&self) {}
}

/// Per-item handler run on a pool worker
///
/// Errors are logged at the worker boundary; the item is not retried.
#[async_trait]
pub trait WorkHandler<T>: Send + Sync {
    async fn handle(&self, item: T) -> anyhow::Result<()>;
}

/// Handle to a running dispatch loop
pub struct DispatchHandle {
    name: String,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DispatchHandle {
    /// Queue name the loop drains
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the loop task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop and wait for it to exit
    ///
    /// Items still queued stay in the queue.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(queue = %self.name, error = %e, "Dispatch loop task failed");
        }
    }
}

/// Single consumer of a [`WorkQueue`]
///
/// Suspends on the queue's not-empty signal, then drains items into the pool
/// while the gate is open. While the gate is paused items accumulate; draining
/// resumes as soon as the gate reopens.
pub struct DispatchLoop<T> {
    queue: Arc<WorkQueue<T>>,
    pool: WorkerPool,
    gate: Arc<dyn DispatchGate>,
    handler: Arc<dyn WorkHandler<T>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<T: Send + 'static> DispatchLoop<T> {
    /// Start the loop on its own task
    pub fn spawn(
        queue: Arc<WorkQueue<T>>,
        pool: WorkerPool,
        gate: Arc<dyn DispatchGate>,
        handler: Arc<dyn WorkHandler<T>>,
    ) -> DispatchHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let name = queue.name().to_string();

        let dispatch = Self {
            queue,
            pool,
            gate,
            handler,
            shutdown_rx,
        };
        let task = tokio::spawn(dispatch.run());

        DispatchHandle {
            name,
            shutdown_tx,
            task,
        }
    }

    async fn run(mut self) {
        info!(queue = %self.queue.name(), pool = %self.pool.name(), "Dispatch loop started");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => break,
                ready = self.queue.wait_not_empty() => {
                    if !ready {
                        debug!(queue = %self.queue.name(), "Queue closed");
                        break;
                    }
                }
            }

            if !self.drain().await {
                break;
            }
        }

        info!(queue = %self.queue.name(), "Dispatch loop stopped");
    }

    /// Dispatch until the queue is empty; `false` means shutdown was requested
    async fn drain(&mut self) -> bool {
        loop {
            if self.is_shutdown() {
                return false;
            }

            if self.gate.is_paused() {
                debug!(
                    queue = %self.queue.name(),
                    pending = self.queue.size(),
                    "Dispatch paused"
                );
                tokio::select! {
                    biased;
                    _ = self.shutdown_rx.changed() => return false,
                    _ = self.gate.wait_until_open() => {}
                }
                debug!(queue = %self.queue.name(), "Dispatch resumed");
                continue;
            }

            let depth = self.queue.size();
            if depth > DEPTH_LOG_THRESHOLD && depth % DEPTH_LOG_INTERVAL == 0 {
                info!(queue = %self.queue.name(), depth, "Queue backlog");
            }

            let Some(item) = self.queue.dequeue() else {
                return true;
            };

            let handler = Arc::clone(&self.handler);
            if let Err(e) = self.pool.submit(async move { handler.handle(item).await }) {
                warn!(
                    queue = %self.queue.name(),
                    error = %e,
                    "Dropped work item: pool rejected dispatch"
                );
            }
        }
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}
