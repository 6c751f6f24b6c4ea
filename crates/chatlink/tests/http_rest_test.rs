//! REST channel over HTTP against a mock authorization server and API

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

use chatlink::message::RestMessage;
use chatlink::reliability::BackoffPolicy;
use chatlink::rest::{
    AuthConfig, AuthenticatedRetrySender, Credentials, HttpCredentialExchange, HttpRestTransport,
    NoopAuditSink, RestSendError, StatusCode, TokenAuthenticator,
};

fn sender(server: &MockServer) -> AuthenticatedRetrySender {
    let config = AuthConfig {
        retry: BackoffPolicy::fixed(Duration::from_millis(10), 3),
        auth_base_url: server.uri(),
        api_base_url: server.uri(),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    };

    let exchange = HttpCredentialExchange::new(&config.auth_base_url, config.request_timeout)
        .expect("client builds");
    let transport = HttpRestTransport::new(&config.api_base_url, config.request_timeout)
        .expect("client builds");
    let authenticator = Arc::new(TokenAuthenticator::new(Arc::new(exchange), &config));

    AuthenticatedRetrySender::new(Arc::new(transport), authenticator, Arc::new(NoopAuditSink))
}

fn token_body(token: &str) -> serde_json::Value {
    json!({
        "access_token": token,
        "token_type": "bearer",
        "expires_in": 3600
    })
}

#[tokio::test]
async fn test_expired_token_is_refreshed_over_http() {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .and(matchers::path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("first")))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(matchers::method("POST"))
        .and(matchers::path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("second")))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(matchers::method("POST"))
        .and(matchers::path("/message/send/"))
        .and(matchers::header("Authorization", "Bearer first"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(matchers::method("POST"))
        .and(matchers::path("/message/send/"))
        .and(matchers::header("Authorization", "Bearer second"))
        .and(matchers::body_partial_json(json!({ "To": "user-1,user-2" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sender = sender(&server);
    sender
        .authenticator()
        .authenticate(&Credentials::new("client", "secret"))
        .await
        .expect("authenticated");

    let status = sender
        .send(&RestMessage::to_recipients("bot", "user-1,user-2", "news"))
        .await
        .expect("sent after refresh");

    assert_eq!(status, StatusCode::OK);
    assert_eq!(sender.authenticator().current_token().as_deref(), Some("second"));
}

#[tokio::test]
async fn test_bad_request_over_http_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .and(matchers::path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("only")))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(matchers::method("POST"))
        .and(matchers::path("/message/send/"))
        .respond_with(ResponseTemplate::new(400).set_body_string("missing To"))
        .expect(1)
        .mount(&server)
        .await;

    let sender = sender(&server);
    sender
        .authenticator()
        .authenticate(&Credentials::new("client", "secret"))
        .await
        .expect("authenticated");

    let result = sender.send(&RestMessage::new("bot", "no recipients")).await;
    assert!(matches!(result, Err(RestSendError::NonRetryable { .. })));
}

#[tokio::test]
async fn test_rejected_credentials_exhaust_retries() {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .and(matchers::path("/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
        .expect(3)
        .mount(&server)
        .await;

    let sender = sender(&server);
    let result = sender
        .authenticator()
        .authenticate(&Credentials::new("client", "wrong"))
        .await;

    assert!(result.is_err());
    assert!(!sender.authenticator().is_access_token_available());
}
