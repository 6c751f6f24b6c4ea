//! Message payloads carried through the queues
//!
//! The payloads are deliberately thin: rendering, markup and links belong to
//! the application. The core only needs addressing and a body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default spool timeout for REST messages (7 days)
pub const DEFAULT_SPOOL_TIMEOUT_SECS: u64 = 604_800;

/// Message sent over the persistent channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Sending application/service address
    pub from: String,
    /// Recipient address
    pub to: String,
    /// Message body
    pub body: String,
}

impl OutboundMessage {
    pub fn new(from: impl Into<String>, to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            body: body.into(),
        }
    }
}

/// Message received from the persistent channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Sender address
    pub from: String,
    /// Address the message was sent to (this application)
    pub to: String,
    /// Message body
    pub body: String,
    /// When the channel handed the message over
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(from: impl Into<String>, to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    /// Build a reply addressed back to the sender
    pub fn reply(&self, body: impl Into<String>) -> OutboundMessage {
        OutboundMessage::new(self.to.clone(), self.from.clone(), body)
    }
}

/// Message sent through the REST channel
///
/// `to` holds a comma-delimited recipient list so a single request can
/// broadcast to several users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RestMessage {
    pub body: String,
    pub contains_markup: bool,
    pub from: String,
    pub to: String,
    pub spool: bool,
    #[serde(rename = "SpoolTimeOut")]
    pub spool_timeout_secs: u64,
    #[serde(skip)]
    recipient_count: usize,
}

impl RestMessage {
    /// Create a message with no recipients yet
    pub fn new(from: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            contains_markup: true,
            from: from.into(),
            to: String::new(),
            spool: true,
            spool_timeout_secs: DEFAULT_SPOOL_TIMEOUT_SECS,
            recipient_count: 0,
        }
    }

    /// Create a message for a single recipient (or a comma-delimited list)
    pub fn to_recipients(
        from: impl Into<String>,
        recipients: &str,
        body: impl Into<String>,
    ) -> Self {
        let mut message = Self::new(from, body);
        message.add_recipients(recipients);
        message
    }

    /// Convert a persistent-channel message for REST delivery
    pub fn from_outbound(message: &OutboundMessage) -> Self {
        Self::to_recipients(message.from.clone(), &message.to, message.body.clone())
    }

    /// Append recipients given as a comma-delimited string
    pub fn add_recipients(&mut self, recipients: &str) {
        let added = recipients
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .count();
        if added == 0 {
            return;
        }

        if self.to.is_empty() {
            self.to = recipients.to_string();
        } else {
            self.to.push(',');
            self.to.push_str(recipients);
        }
        self.recipient_count += added;
    }

    /// Number of recipients added so far
    pub fn recipient_count(&self) -> usize {
        self.recipient_count
    }

    pub fn with_markup(mut self, contains_markup: bool) -> Self {
        self.contains_markup = contains_markup;
        self
    }

    pub fn with_spool(mut self, spool: bool, timeout_secs: u64) -> Self {
        self.spool = spool;
        self.spool_timeout_secs = timeout_secs;
        self
    }
}
