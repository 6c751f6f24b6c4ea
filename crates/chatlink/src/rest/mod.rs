//! REST channel: bearer-token authentication and retrying delivery
//!
//! This module provides:
//! - [`TokenAuthenticator`] - Serialized client-credentials exchange with bounded retries
//! - [`AuthenticatedRetrySender`] - Send, classify the status, re-authenticate or retry once
//! - [`HttpRestTransport`] / [`HttpCredentialExchange`] - `reqwest` implementations
//! - [`AuditSink`] - Receives every send attempt
//!
//! # Send protocol
//!
//! ```text
//!  send(msg) ──▶ execute(msg, token)
//!                    │
//!        ┌───────────┼──────────────┬──────────────────┐
//!        ▼           ▼              ▼                  ▼
//!      200 OK   400 BadRequest  401 Unauthorized    other / no response
//!      done     fail, no retry  reauthenticate()    retry once, same token
//!                               retry once, new token
//! ```

mod audit;
mod auth;
mod sender;
mod transport;

pub use audit::{AuditSink, NoopAuditSink, TracingAuditSink};
pub use auth::{
    AuthConfig, AuthError, CredentialExchange, Credentials, HttpCredentialExchange,
    TokenAuthenticator, TokenResponse, DEFAULT_AUTH_BASE_URL, DEFAULT_SCOPE,
};
pub use sender::{AuthenticatedRetrySender, RestSendError};
pub use transport::{
    HttpRestTransport, RestResponse, RestTransport, RestTransportError, DEFAULT_API_BASE_URL,
};

pub use reqwest::StatusCode;
