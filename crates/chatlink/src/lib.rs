//! # Chatlink
//!
//! A resilience layer between a chat-bot application and a remote messaging
//! endpoint reachable over a persistent session channel and a token-guarded
//! REST API.
//!
//! ## Features
//!
//! - **Queued dispatch**: producers enqueue without blocking; one dispatch loop per queue feeds a bounded worker pool
//! - **Single-flight reconnect**: transport failures trigger exactly one background reconnect, retried until it succeeds
//! - **Keep-alive**: periodic heartbeat on the persistent channel, suppressed while reconnecting
//! - **Authenticated retry**: REST sends re-authenticate once on 401 and retry once, never on 400
//! - **Injectable time**: every backoff goes through `tokio::time`, so tests run on a paused clock
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     MessagingContext                         │
//! │  (owns everything, defines startup/shutdown order)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!         ┌────────────────────┼────────────────────┐
//!         ▼                    ▼                    ▼
//!   outbound queue         REST queue          inbound queue
//!         │                    │                    │
//!   DispatchLoop          DispatchLoop         DispatchLoop
//!   (gated on reconnect)       │                    │
//!         ▼                    ▼                    ▼
//!    WorkerPool            WorkerPool           WorkerPool
//!         │                    │                    │
//!         ▼                    ▼                    ▼
//! ┌───────────────────┐ ┌──────────────────────┐  application
//! │ConnectionLifecycle│ │AuthenticatedRetry-   │  handler
//! │ connect/heartbeat/│ │Sender + Token-       │
//! │ reconnect         │ │Authenticator         │
//! └───────────────────┘ └──────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use chatlink::prelude::*;
//!
//! let config = MessagingConfig::from_env()?;
//! let collaborators = Collaborators::http(&config, channel_factory, inbound_handler)?;
//! let context = MessagingContext::new(config, collaborators)?;
//!
//! context
//!     .startup(
//!         ChannelCredentials::new("app-id", "app-secret"),
//!         Some(Credentials::new("client-id", "client-secret")),
//!     )
//!     .await?;
//!
//! context.enqueue_outbound(OutboundMessage::new("bot", "user-1", "hello"));
//! context.enqueue_rest(RestMessage::to_recipients("bot", "user-1,user-2", "news"));
//!
//! context.shutdown().await;
//! ```

pub mod config;
pub mod connection;
pub mod context;
pub mod message;
pub mod queue;
pub mod reliability;
pub mod rest;
pub mod telemetry;
pub mod worker;

mod duration_millis;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ConfigError, MessagingConfig};
    pub use crate::connection::{
        ChannelCredentials, ChannelFactory, ConnectionConfig, ConnectionLifecycle,
        ConnectionState, ConnectionStatus, InboundSink, LifecycleError, TransportChannel,
        TransportError, TransportErrorKind,
    };
    pub use crate::context::{Collaborators, ContextError, MessagingContext};
    pub use crate::message::{InboundMessage, OutboundMessage, RestMessage};
    pub use crate::queue::{DispatchGate, WorkHandler, WorkQueue};
    pub use crate::reliability::BackoffPolicy;
    pub use crate::rest::{
        AuditSink, AuthenticatedRetrySender, Credentials, RestSendError, RestTransport,
        StatusCode, TokenAuthenticator,
    };
    pub use crate::worker::{PoolStats, WorkerPool, WorkerPoolConfig, WorkerPoolError};
}

// Re-export key types at crate root
pub use config::{ConfigError, MessagingConfig};
pub use connection::{
    ChannelCredentials, ConnectionLifecycle, ConnectionState, ConnectionStatus, LifecycleError,
};
pub use context::{Collaborators, ContextError, MessagingContext};
pub use message::{InboundMessage, OutboundMessage, RestMessage};
pub use queue::{DispatchLoop, WorkQueue};
pub use reliability::BackoffPolicy;
pub use rest::{AuthenticatedRetrySender, Credentials, RestSendError, TokenAuthenticator};
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerPoolError};
