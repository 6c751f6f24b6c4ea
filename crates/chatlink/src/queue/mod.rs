//! Producer/consumer queues feeding the worker pools
//!
//! This module provides:
//! - [`WorkQueue`] - Unbounded FIFO with a not-empty wake-up signal
//! - [`DispatchLoop`] - Single consumer draining a queue into a [`WorkerPool`](crate::worker::WorkerPool)
//! - [`DispatchGate`] - Pauses draining while the downstream channel is unavailable
//! - [`WorkHandler`] - Per-item handler executed on a pool worker

mod dispatch;
mod work_queue;

pub use dispatch::{DispatchGate, DispatchHandle, DispatchLoop, OpenGate, WorkHandler};
pub use work_queue::WorkQueue;
