//! REST delivery with failure classification and a single retry

use std::sync::Arc;

use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

use super::audit::AuditSink;
use super::auth::{AuthError, TokenAuthenticator};
use super::transport::{RestResponse, RestTransport};
use crate::message::RestMessage;

/// REST send errors
#[derive(Debug, thiserror::Error)]
pub enum RestSendError {
    /// Malformed request; never retried
    #[error("request rejected as malformed ({status})")]
    NonRetryable { status: StatusCode },

    /// The single retry failed too; `status` is `None` if no response came back
    #[error("send failed after retry (status: {status:?})")]
    RetryFailed { status: Option<StatusCode> },

    /// Token was rejected and re-authentication did not produce a new one
    #[error("re-authentication failed: {0}")]
    AuthenticationFailed(#[source] AuthError),

    /// Single-shot send failed
    #[error("send failed (status: {status:?})")]
    Rejected { status: Option<StatusCode> },
}

/// How a failed attempt is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    /// 400: caller error, give up
    BadRequest,
    /// 401: token expired or revoked
    Unauthorized,
    /// Anything else, including no response at all
    Other,
}

fn classify(status: Option<StatusCode>) -> Option<Failure> {
    match status {
        Some(StatusCode::OK) => None,
        Some(StatusCode::BAD_REQUEST) => Some(Failure::BadRequest),
        Some(StatusCode::UNAUTHORIZED) => Some(Failure::Unauthorized),
        _ => Some(Failure::Other),
    }
}

/// Sends REST messages with the current bearer token
///
/// At most one retry is made per call: after re-authenticating on a 401, or
/// with the same token on any other failure except a 400.
pub struct AuthenticatedRetrySender {
    transport: Arc<dyn RestTransport>,
    authenticator: Arc<TokenAuthenticator>,
    audit: Arc<dyn AuditSink>,
}

impl AuthenticatedRetrySender {
    pub fn new(
        transport: Arc<dyn RestTransport>,
        authenticator: Arc<TokenAuthenticator>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            transport,
            authenticator,
            audit,
        }
    }

    pub fn authenticator(&self) -> &Arc<TokenAuthenticator> {
        &self.authenticator
    }

    /// Deliver `message`, retrying once on a retryable failure
    #[instrument(skip(self, message), fields(to = %message.to))]
    pub async fn send(&self, message: &RestMessage) -> Result<StatusCode, RestSendError> {
        let (token, generation) = self.authenticator.token_snapshot();
        let token = token.unwrap_or_default();

        let status = self.attempt(message, &token).await;
        let retry_token = match classify(status) {
            None => return Ok(StatusCode::OK),
            Some(Failure::BadRequest) => {
                warn!(to = %message.to, "REST send rejected as bad request");
                return Err(RestSendError::NonRetryable {
                    status: StatusCode::BAD_REQUEST,
                });
            }
            Some(Failure::Unauthorized) => {
                debug!(generation, "Token rejected, re-authenticating");
                self.authenticator
                    .reauthenticate(generation)
                    .await
                    .map_err(RestSendError::AuthenticationFailed)?;
                self.authenticator.current_token().unwrap_or_default()
            }
            Some(Failure::Other) => {
                debug!(status = ?status, "Retryable REST failure, retrying once");
                token
            }
        };

        let status = self.attempt(message, &retry_token).await;
        match classify(status) {
            None => Ok(StatusCode::OK),
            Some(_) => {
                warn!(to = %message.to, status = ?status, "REST send failed after retry");
                Err(RestSendError::RetryFailed { status })
            }
        }
    }

    /// Deliver once on behalf of a user holding their own token
    ///
    /// No retry and no re-authentication.
    pub async fn send_with_token(
        &self,
        token: &str,
        message: &RestMessage,
    ) -> Result<StatusCode, RestSendError> {
        let status = self.attempt(message, token).await;
        match classify(status) {
            None => Ok(StatusCode::OK),
            Some(Failure::BadRequest) => Err(RestSendError::NonRetryable {
                status: StatusCode::BAD_REQUEST,
            }),
            Some(_) => Err(RestSendError::Rejected { status }),
        }
    }

    /// One transport call, recorded to the audit sink
    async fn attempt(&self, message: &RestMessage, token: &str) -> Option<StatusCode> {
        match self.transport.execute(message, token).await {
            Ok(RestResponse { status, body }) => {
                self.audit.record(message, &body, Some(status)).await;
                Some(status)
            }
            Err(e) => {
                warn!(error = %e, "REST transport error");
                self.audit.record(message, &e.to_string(), None).await;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify(Some(StatusCode::OK)), None);
        assert_eq!(
            classify(Some(StatusCode::BAD_REQUEST)),
            Some(Failure::BadRequest)
        );
        assert_eq!(
            classify(Some(StatusCode::UNAUTHORIZED)),
            Some(Failure::Unauthorized)
        );
        assert_eq!(
            classify(Some(StatusCode::SERVICE_UNAVAILABLE)),
            Some(Failure::Other)
        );
        assert_eq!(classify(Some(StatusCode::ACCEPTED)), Some(Failure::Other));
        assert_eq!(classify(None), Some(Failure::Other));
    }

    #[test]
    fn test_error_messages() {
        let err = RestSendError::NonRetryable {
            status: StatusCode::BAD_REQUEST,
        };
        assert!(err.to_string().contains("400"));

        let err = RestSendError::RetryFailed { status: None };
        assert!(err.to_string().contains("None"));
    }
}
