//! Worker pool executing dispatched work
//!
//! This module provides:
//! - [`WorkerPool`] - Bounded pool of worker tasks scaling between min and max
//! - [`WorkerPoolConfig`] - Worker bounds, idle retirement, shutdown timeout
//! - [`PoolStats`] - Live counters for diagnostics
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │                                                              │
//! │   submit(job) ──▶ ┌──────────────────────┐                  │
//! │                   │  pending jobs (FIFO) │                  │
//! │                   └──────────┬───────────┘                  │
//! │                              │ job_ready                     │
//! │                              ▼                               │
//! │  ┌──────────────────────────────────┐ ┌──────────────────┐  │
//! │  │ resident workers (min_workers)   │ │ on-demand workers │  │
//! │  │ never retire                     │ │ retire when idle  │  │
//! │  └──────────────────────────────────┘ └──────────────────┘  │
//! │                 total workers ≤ max_workers                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod pool;

pub use pool::{PoolStats, WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus};
