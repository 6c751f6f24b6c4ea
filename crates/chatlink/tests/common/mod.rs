//! In-memory fakes of the external collaborators

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use chatlink::connection::{ChannelFactory, InboundSink, TransportChannel, TransportError};
use chatlink::message::{InboundMessage, OutboundMessage, RestMessage};
use chatlink::queue::WorkHandler;
use chatlink::rest::{
    AuditSink, AuthError, CredentialExchange, Credentials, RestResponse, RestTransport,
    RestTransportError, StatusCode, TokenResponse,
};

// =============================================================================
// Persistent channel
// =============================================================================

/// State shared by every channel handle the factory creates
#[derive(Default)]
pub struct ChannelState {
    pub created: AtomicUsize,
    pub connects: AtomicUsize,
    pub keep_alives: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub closes: AtomicUsize,
    connects_in_flight: AtomicUsize,
    pub max_connects_in_flight: AtomicUsize,
    connect_failures: AtomicUsize,
    send_failures: Mutex<VecDeque<TransportError>>,
    keep_alive_failures: Mutex<VecDeque<TransportError>>,
    sent: Mutex<Vec<OutboundMessage>>,
    sink: Mutex<Option<Arc<dyn InboundSink>>>,
}

#[derive(Clone, Default)]
pub struct FakeChannelFactory {
    pub state: Arc<ChannelState>,
}

impl FakeChannelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` connect attempts
    pub fn fail_connects(&self, count: usize) {
        self.state.connect_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_send(&self, error: TransportError) {
        self.state.send_failures.lock().push_back(error);
    }

    pub fn fail_next_keep_alive(&self, error: TransportError) {
        self.state.keep_alive_failures.lock().push_back(error);
    }

    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn keep_alives(&self) -> usize {
        self.state.keep_alives.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub fn sent_bodies(&self) -> Vec<String> {
        self.state.sent.lock().iter().map(|m| m.body.clone()).collect()
    }

    /// Push a message as if the remote endpoint sent it
    pub async fn push_inbound(&self, message: InboundMessage) -> anyhow::Result<()> {
        let sink = self.state.sink.lock().clone();
        match sink {
            Some(sink) => sink.deliver(message).await,
            None => anyhow::bail!("no channel connected"),
        }
    }
}

impl ChannelFactory for FakeChannelFactory {
    fn create(&self) -> Result<Arc<dyn TransportChannel>, TransportError> {
        self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeChannel {
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct FakeChannel {
    state: Arc<ChannelState>,
}

#[async_trait]
impl TransportChannel for FakeChannel {
    async fn connect(
        &self,
        _app_id: &str,
        _secret: &str,
        sink: Arc<dyn InboundSink>,
    ) -> Result<(), TransportError> {
        let in_flight = self.state.connects_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .max_connects_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        // Yield so overlapping connects would be observable
        tokio::task::yield_now().await;
        self.state.connects_in_flight.fetch_sub(1, Ordering::SeqCst);

        let failing = self
            .state
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::communication("connection refused"));
        }

        *self.state.sink.lock() = Some(sink);
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        if let Some(error) = self.state.send_failures.lock().pop_front() {
            return Err(error);
        }
        self.state.sent.lock().push(message.clone());
        Ok(())
    }

    async fn keep_alive(&self) -> Result<(), TransportError> {
        self.state.keep_alives.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.state.keep_alive_failures.lock().pop_front() {
            return Err(error);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// REST channel
// =============================================================================

/// Answers scripted statuses first, then 401 for expired tokens and 200 otherwise
#[derive(Default)]
pub struct FakeRestTransport {
    script: Mutex<VecDeque<Result<StatusCode, String>>>,
    expired_tokens: Mutex<HashSet<String>>,
    tokens_seen: Mutex<Vec<String>>,
}

impl FakeRestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, status: StatusCode) {
        self.script.lock().push_back(Ok(status));
    }

    /// Next call fails without an HTTP status
    pub fn fail(&self, message: &str) {
        self.script.lock().push_back(Err(message.to_string()));
    }

    pub fn expire_token(&self, token: &str) {
        self.expired_tokens.lock().insert(token.to_string());
    }

    pub fn calls(&self) -> usize {
        self.tokens_seen.lock().len()
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().clone()
    }
}

#[async_trait]
impl RestTransport for FakeRestTransport {
    async fn execute(
        &self,
        _message: &RestMessage,
        token: &str,
    ) -> Result<RestResponse, RestTransportError> {
        self.tokens_seen.lock().push(token.to_string());

        let scripted = self.script.lock().pop_front();
        let status = match scripted {
            Some(Ok(status)) => status,
            Some(Err(message)) => return Err(RestTransportError::Unavailable(message)),
            None if self.expired_tokens.lock().contains(token) => StatusCode::UNAUTHORIZED,
            None => StatusCode::OK,
        };

        Ok(RestResponse::new(status, format!("status {}", status.as_u16())))
    }
}

/// Hands out `token-1`, `token-2`, ... unless a failure is scripted
pub struct FakeCredentialExchange {
    calls: AtomicUsize,
    issued: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    failures: AtomicUsize,
    delay: Duration,
}

impl FakeCredentialExchange {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Each exchange takes `delay` on the tokio clock
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            delay,
        }
    }

    /// Fail the next `count` exchanges
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialExchange for FakeCredentialExchange {
    async fn request_token(
        &self,
        _credentials: &Credentials,
        _scope: &str,
    ) -> Result<TokenResponse, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AuthError::Rejected {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "try later".to_string(),
            });
        }

        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenResponse {
            access_token: format!("token-{n}"),
            ..Default::default()
        })
    }
}

#[derive(Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<(String, Option<StatusCode>)>>,
}

impl RecordingAuditSink {
    pub fn statuses(&self) -> Vec<Option<StatusCode>> {
        self.records.lock().iter().map(|(_, s)| *s).collect()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.records.lock().iter().map(|(b, _)| b.clone()).collect()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, _message: &RestMessage, body: &str, status: Option<StatusCode>) {
        self.records.lock().push((body.to_string(), status));
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Records handled items and the peak number of concurrent invocations
pub struct RecordingHandler<T> {
    pub items: Mutex<Vec<T>>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    work: Duration,
}

impl<T> RecordingHandler<T> {
    pub fn new() -> Self {
        Self::with_work(Duration::ZERO)
    }

    /// Each item takes `work` on the tokio clock
    pub fn with_work(work: Duration) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            work,
        }
    }

    pub fn count(&self) -> usize {
        self.items.lock().len()
    }
}

#[async_trait]
impl<T: Send + 'static> WorkHandler<T> for RecordingHandler<T> {
    async fn handle(&self, item: T) -> anyhow::Result<()> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }

        self.items.lock().push(item);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll `condition` on the tokio clock until it holds
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(120), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
