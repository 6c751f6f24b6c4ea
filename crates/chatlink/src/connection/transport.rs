//! Capability interface of the persistent channel

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::{InboundMessage, OutboundMessage};

/// Classified transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    CommunicationAborted,
    CommunicationFaulted,
    GenericCommunication,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::CommunicationAborted => "communication aborted",
            Self::CommunicationFaulted => "communication faulted",
            Self::GenericCommunication => "communication failure",
        };
        f.write_str(name)
    }
}

/// Failure reported by a [`TransportChannel`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::CommunicationAborted, message)
    }

    pub fn faulted(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::CommunicationFaulted, message)
    }

    pub fn communication(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::GenericCommunication, message)
    }
}

/// Receives messages pushed by the remote endpoint
#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn deliver(&self, message: InboundMessage) -> anyhow::Result<()>;
}

/// One session handle on the persistent channel
///
/// A handle is single-use: once it failed or was disconnected, the lifecycle
/// asks the [`ChannelFactory`] for a fresh one.
#[async_trait]
pub trait TransportChannel: Send + Sync {
    /// Open the session; inbound traffic is pushed to `sink`
    async fn connect(
        &self,
        app_id: &str,
        secret: &str,
        sink: Arc<dyn InboundSink>,
    ) -> Result<(), TransportError>;

    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;

    async fn keep_alive(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Release the handle's resources
    async fn close(&self);
}

/// Creates fresh channel handles
pub trait ChannelFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn TransportChannel>, TransportError>;
}
