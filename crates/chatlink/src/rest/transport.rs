//! HTTP delivery of REST messages

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use tracing::debug;

use crate::message::RestMessage;

/// Default REST API base URL
pub const DEFAULT_API_BASE_URL: &str = "http://api.mxit.com";

/// Status and body of a REST call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestResponse {
    pub status: StatusCode,
    pub body: String,
}

impl RestResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Failure with no HTTP status (connect error, timeout, unreadable body)
#[derive(Debug, thiserror::Error)]
pub enum RestTransportError {
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("endpoint unavailable: {0}")]
    Unavailable(String),
}

/// Executes a REST message against the remote API
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn execute(
        &self,
        message: &RestMessage,
        token: &str,
    ) -> Result<RestResponse, RestTransportError>;
}

/// `reqwest`-backed transport posting to `{api_base_url}/message/send/`
pub struct HttpRestTransport {
    client: Client,
    send_url: String,
}

impl HttpRestTransport {
    pub fn new(api_base_url: &str, timeout: Duration) -> Result<Self, RestTransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_base_url))
    }

    /// Use a preconfigured client
    pub fn with_client(client: Client, api_base_url: &str) -> Self {
        Self {
            client,
            send_url: format!("{}/message/send/", api_base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl RestTransport for HttpRestTransport {
    async fn execute(
        &self,
        message: &RestMessage,
        token: &str,
    ) -> Result<RestResponse, RestTransportError> {
        let response = self
            .client
            .post(&self.send_url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .json(message)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(%status, to = %message.to, "REST call completed");

        Ok(RestResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer) -> HttpRestTransport {
        HttpRestTransport::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_posts_json_with_bearer_token() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/message/send/"))
            .and(matchers::header("authorization", "Bearer tok-1"))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::body_partial_json(serde_json::json!({
                "To": "u1,u2",
                "From": "bot",
                "Body": "hello",
                "SpoolTimeOut": 604800
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("queued"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let message = RestMessage::to_recipients("bot", "u1,u2", "hello");
        let response = transport(&mock_server)
            .execute(&message, "tok-1")
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, "queued");
    }

    #[tokio::test]
    async fn test_error_statuses_are_returned_not_raised() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
            .mount(&mock_server)
            .await;

        let message = RestMessage::to_recipients("bot", "u1", "hi");
        let response = transport(&mock_server)
            .execute(&message, "stale")
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.body, "token expired");
    }

    #[tokio::test]
    async fn test_trailing_slash_in_base_url() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/message/send/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let base = format!("{}/", mock_server.uri());
        let transport = HttpRestTransport::new(&base, Duration::from_secs(5)).unwrap();
        let message = RestMessage::to_recipients("bot", "u1", "hi");

        assert!(transport.execute(&message, "t").await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        // Nothing listens on port 9 (discard) in the test environment
        let transport =
            HttpRestTransport::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let message = RestMessage::to_recipients("bot", "u1", "hi");

        let result = transport.execute(&message, "t").await;
        assert!(matches!(result, Err(RestTransportError::Request(_))));
    }
}
