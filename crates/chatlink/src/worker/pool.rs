//! Worker pool for dispatched work
//!
//! Runs dispatched futures on a bounded set of worker tasks that scales
//! between a resident minimum and a configured maximum.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

use crate::duration_millis;

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Pool name (used in logs)
    pub name: String,

    /// Workers spawned at start that never retire
    pub min_workers: usize,

    /// Upper bound on concurrently running workers
    pub max_workers: usize,

    /// How long an on-demand worker waits for work before retiring
    #[serde(with = "duration_millis")]
    pub idle_timeout: Duration,

    /// Graceful shutdown timeout
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            min_workers: 20,
            max_workers: 20,
            idle_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with default worker counts
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the worker bounds
    pub fn with_workers(mut self, min: usize, max: usize) -> Self {
        self.min_workers = min;
        self.max_workers = max;
        self
    }

    /// Set the idle timeout for on-demand workers
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), WorkerPoolError> {
        if self.max_workers == 0 {
            return Err(WorkerPoolError::InvalidConfig(format!(
                "{}: max_workers must be at least 1",
                self.name
            )));
        }
        if self.min_workers > self.max_workers {
            return Err(WorkerPoolError::InvalidConfig(format!(
                "{}: min_workers ({}) exceeds max_workers ({})",
                self.name, self.min_workers, self.max_workers
            )));
        }
        Ok(())
    }
}

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    /// Pool is running and accepting work
    Running,
    /// Pool is draining (finishing queued work, not accepting new work)
    Draining,
    /// Pool has stopped
    Stopped,
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Configuration rejected by `validate`
    #[error("invalid worker pool configuration: {0}")]
    InvalidConfig(String),

    /// Pool already running
    #[error("worker pool is already running")]
    AlreadyRunning,

    /// Pool not running
    #[error("worker pool is not running")]
    NotRunning,

    /// Shutdown timeout
    #[error("graceful shutdown timed out with {remaining} workers still running")]
    ShutdownTimeout { remaining: usize },
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub min: usize,
    pub max: usize,
    /// Workers currently running a job
    pub active: usize,
    /// Workers waiting for a job
    pub idle: usize,
    /// All live workers
    pub total: usize,
    /// Jobs handed to the pool but not yet picked up by a worker
    pub queued: usize,
}

type Job = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

#[derive(Default)]
struct PoolState {
    jobs: VecDeque<Job>,
    idle: usize,
    active: usize,
    total: usize,
}

struct PoolInner {
    config: WorkerPoolConfig,
    state: Mutex<PoolState>,
    status: RwLock<WorkerPoolStatus>,
    job_ready: Notify,
}

/// Pool of worker tasks executing dispatched work
///
/// Every submitted job is handed to exactly one worker. Handler errors and
/// panics are caught at the worker boundary and logged; the worker goes back
/// to waiting for work.
///
/// # Example
///
/// ```ignore
/// use chatlink::worker::{WorkerPool, WorkerPoolConfig};
///
/// let pool = WorkerPool::new(WorkerPoolConfig::new("outbound").with_workers(2, 8))?;
/// pool.start()?;
///
/// pool.submit(async move {
///     channel.send(&message).await?;
///     Ok(())
/// })?;
///
/// pool.shutdown().await?;
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a stopped pool after validating the configuration
    pub fn new(config: WorkerPoolConfig) -> Result<Self, WorkerPoolError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(PoolState::default()),
                status: RwLock::new(WorkerPoolStatus::Stopped),
                job_ready: Notify::new(),
            }),
        })
    }

    /// Spawn the resident workers and start accepting work
    #[instrument(skip(self), fields(pool = %self.inner.config.name))]
    pub fn start(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.inner.status.write();
            if *status != WorkerPoolStatus::Stopped {
                return Err(WorkerPoolError::AlreadyRunning);
            }
            *status = WorkerPoolStatus::Running;
        }

        let resident = self.inner.config.min_workers;
        {
            let mut state = self.inner.state.lock();
            state.total += resident;
            state.idle += resident;
        }
        for _ in 0..resident {
            spawn_worker(Arc::clone(&self.inner), true);
        }

        info!(
            pool = %self.inner.config.name,
            min_workers = self.inner.config.min_workers,
            max_workers = self.inner.config.max_workers,
            "Worker pool started"
        );
        Ok(())
    }

    /// Hand a job to the pool
    ///
    /// Runs on an idle worker if one exists; otherwise spawns a new worker
    /// while below `max_workers`, or queues the job until a worker frees up.
    pub fn submit<F>(&self, job: F) -> Result<(), WorkerPoolError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let spawn_extra = {
            let mut state = self.inner.state.lock();
            if *self.inner.status.read() != WorkerPoolStatus::Running {
                return Err(WorkerPoolError::NotRunning);
            }
            state.jobs.push_back(Box::pin(job));
            let grow =
                state.jobs.len() > state.idle && state.total < self.inner.config.max_workers;
            if grow {
                state.total += 1;
                state.idle += 1;
            }
            grow
        };

        if spawn_extra {
            debug!(pool = %self.inner.config.name, "Spawning on-demand worker");
            spawn_worker(Arc::clone(&self.inner), false);
        }
        self.inner.job_ready.notify_one();
        Ok(())
    }

    /// Stop accepting work and wait for the workers to drain queued jobs
    #[instrument(skip(self), fields(pool = %self.inner.config.name))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.inner.status.write();
            if *status != WorkerPoolStatus::Running {
                return Ok(());
            }
            *status = WorkerPoolStatus::Draining;
        }

        info!(pool = %self.inner.config.name, queued = self.queue_length(), "Draining worker pool");
        self.inner.job_ready.notify_waiters();

        let deadline = tokio::time::Instant::now() + self.inner.config.shutdown_timeout;
        loop {
            let remaining = self.total_workers();
            if remaining == 0 {
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(
                    pool = %self.inner.config.name,
                    remaining_workers = remaining,
                    "Shutdown timeout reached"
                );
                return Err(WorkerPoolError::ShutdownTimeout { remaining });
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        *self.inner.status.write() = WorkerPoolStatus::Stopped;
        info!(pool = %self.inner.config.name, "Worker pool stopped");
        Ok(())
    }

    /// Get current status
    pub fn status(&self) -> WorkerPoolStatus {
        *self.inner.status.read()
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Jobs waiting for a worker
    pub fn queue_length(&self) -> usize {
        self.inner.state.lock().jobs.len()
    }

    /// Live workers, busy or idle
    pub fn total_workers(&self) -> usize {
        self.inner.state.lock().total
    }

    /// Snapshot of the live counters
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            min: self.inner.config.min_workers,
            max: self.inner.config.max_workers,
            active: state.active,
            idle: state.idle,
            total: state.total,
            queued: state.jobs.len(),
        }
    }

    /// One-line summary: `min | max | w:active | t:total | q:queued`
    pub fn info_string(&self) -> String {
        let stats = self.stats();
        format!(
            "{} | {} | w:{} | t:{} | q:{}",
            stats.min, stats.max, stats.active, stats.total, stats.queued
        )
    }
}

/// The caller has already counted the worker in `total` and `idle`.
fn spawn_worker(inner: Arc<PoolInner>, resident: bool) {
    tokio::spawn(async move {
        while let Some(job) = next_job(&inner, resident).await {
            match AssertUnwindSafe(job).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(pool = %inner.config.name, error = %e, "Work item failed");
                }
                Err(_) => {
                    error!(pool = %inner.config.name, "Work item panicked");
                }
            }

            let mut state = inner.state.lock();
            state.active -= 1;
            state.idle += 1;
        }
    });
}

/// Wait for the next job; `None` means the worker should exit
async fn next_job(inner: &PoolInner, resident: bool) -> Option<Job> {
    loop {
        let notified = inner.job_ready.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        {
            let mut state = inner.state.lock();
            if let Some(job) = state.jobs.pop_front() {
                state.idle -= 1;
                state.active += 1;
                return Some(job);
            }
            if *inner.status.read() != WorkerPoolStatus::Running {
                state.idle -= 1;
                state.total -= 1;
                return None;
            }
        }

        if resident {
            notified.await;
        } else if tokio::time::timeout(inner.config.idle_timeout, notified)
            .await
            .is_err()
        {
            let mut state = inner.state.lock();
            if state.jobs.is_empty() {
                state.idle -= 1;
                state.total -= 1;
                debug!(pool = %inner.config.name, "On-demand worker retired");
                return None;
            }
        }
    }
}
