//! Reliability patterns for the messaging channels
//!
//! This module provides:
//! - [`BackoffPolicy`] - Fixed-interval backoff with an optional attempt ceiling

mod backoff;

pub use backoff::BackoffPolicy;
