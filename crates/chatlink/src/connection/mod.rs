//! Persistent channel management
//!
//! This module provides:
//! - [`ConnectionLifecycle`] - Connect, keep-alive, single-flight reconnect
//! - [`TransportChannel`] / [`ChannelFactory`] - Capability interface of the vendor channel
//! - [`TransportError`] - Failures classified by [`TransportErrorKind`]
//!
//! # State machine
//!
//! ```text
//!                 connect()                 success
//!  Disconnected ─────────────▶ Connecting ─────────────▶ Connected
//!       ▲                                                 │    ▲
//!       │ disconnect()          transport failure         │    │ success
//!       └──────────────────────── (send / keep-alive) ────┘    │
//!                                        │                     │
//!                                        ▼                     │
//!                                   Reconnecting ──────────────┘
//!                                   (retry every backoff interval)
//! ```

mod lifecycle;
mod transport;

pub use lifecycle::{
    ChannelCredentials, ConnectionConfig, ConnectionLifecycle, ConnectionState, ConnectionStatus,
    HeartbeatOutcome, LifecycleError, ReconnectSendPolicy,
};
pub use transport::{
    ChannelFactory, InboundSink, TransportChannel, TransportError, TransportErrorKind,
};
