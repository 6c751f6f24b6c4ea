//! Audit trail of REST send attempts

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::info;

use crate::message::RestMessage;

/// Receives every REST send attempt, successful or not
///
/// `status` is `None` when the request never produced an HTTP response.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, message: &RestMessage, body: &str, status: Option<StatusCode>);
}

/// Writes each attempt as a structured log event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, message: &RestMessage, body: &str, status: Option<StatusCode>) {
        let request = serde_json::to_string(message).unwrap_or_default();
        info!(
            target: "chatlink::audit",
            from = %message.from,
            to = %message.to,
            recipients = message.recipient_count(),
            status = status.map(|s| s.as_u16()),
            request = %request,
            response = %body,
            "REST send attempt"
        );
    }
}

/// Discards audit records
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _message: &RestMessage, _body: &str, _status: Option<StatusCode>) {}
}
