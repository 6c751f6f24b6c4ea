//! Process-wide messaging context
//!
//! Owns the queues, pools, persistent channel and REST sender, and starts and
//! stops them in a fixed order.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tracing::{info, instrument, warn};

use crate::config::{ConfigError, MessagingConfig};
use crate::connection::{
    ChannelCredentials, ChannelFactory, ConnectionLifecycle, ConnectionStatus, InboundSink,
    LifecycleError,
};
use crate::message::{InboundMessage, OutboundMessage, RestMessage};
use crate::queue::{DispatchGate, DispatchHandle, DispatchLoop, OpenGate, WorkHandler, WorkQueue};
use crate::rest::{
    AuditSink, AuthError, AuthenticatedRetrySender, CredentialExchange, Credentials,
    HttpCredentialExchange, HttpRestTransport, RestSendError, RestTransport, TokenAuthenticator,
    TracingAuditSink,
};
use crate::worker::{PoolStats, WorkerPool, WorkerPoolError};

/// Context errors
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("messaging context is already started")]
    AlreadyStarted,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] WorkerPoolError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("failed to build http client: {0}")]
    Http(String),
}

/// External collaborators the context is wired to
pub struct Collaborators {
    pub channel_factory: Arc<dyn ChannelFactory>,
    pub rest_transport: Arc<dyn RestTransport>,
    pub credential_exchange: Arc<dyn CredentialExchange>,
    pub audit: Arc<dyn AuditSink>,
    /// Application handler for inbound messages
    pub inbound_handler: Arc<dyn WorkHandler<InboundMessage>>,
}

impl Collaborators {
    /// Use the `reqwest` REST transport and credential exchange
    pub fn http(
        config: &MessagingConfig,
        channel_factory: Arc<dyn ChannelFactory>,
        inbound_handler: Arc<dyn WorkHandler<InboundMessage>>,
    ) -> Result<Self, ContextError> {
        let auth = &config.auth;
        let rest_transport = HttpRestTransport::new(&auth.api_base_url, auth.request_timeout)
            .map_err(|e| ContextError::Http(e.to_string()))?;
        let credential_exchange =
            HttpCredentialExchange::new(&auth.auth_base_url, auth.request_timeout)
                .map_err(|e| ContextError::Http(e.to_string()))?;

        Ok(Self {
            channel_factory,
            rest_transport: Arc::new(rest_transport),
            credential_exchange: Arc::new(credential_exchange),
            audit: Arc::new(TracingAuditSink),
            inbound_handler,
        })
    }
}

struct OutboundHandler {
    lifecycle: ConnectionLifecycle,
}

#[async_trait]
impl WorkHandler<OutboundMessage> for OutboundHandler {
    async fn handle(&self, message: OutboundMessage) -> anyhow::Result<()> {
        self.lifecycle.send(&message).await?;
        Ok(())
    }
}

struct RestHandler {
    sender: Arc<AuthenticatedRetrySender>,
}

#[async_trait]
impl WorkHandler<RestMessage> for RestHandler {
    async fn handle(&self, message: RestMessage) -> anyhow::Result<()> {
        self.sender.send(&message).await?;
        Ok(())
    }
}

/// Feeds channel-pushed messages into the inbound queue
struct QueueSink {
    queue: Arc<WorkQueue<InboundMessage>>,
}

#[async_trait]
impl InboundSink for QueueSink {
    async fn deliver(&self, message: InboundMessage) -> anyhow::Result<()> {
        if !self.queue.enqueue(message) {
            anyhow::bail!("inbound queue is closed");
        }
        Ok(())
    }
}

/// Application-facing entry point
///
/// Startup order: pools, dispatch loops, persistent-channel connect, REST
/// authentication. Shutdown order: dispatch loops, pools, channel.
///
/// # Example
///
/// ```ignore
/// use chatlink::{Collaborators, MessagingConfig, MessagingContext};
///
/// let config = MessagingConfig::from_env()?;
/// let collaborators = Collaborators::http(&config, channel_factory, inbound_handler)?;
/// let context = MessagingContext::new(config, collaborators)?;
///
/// context.startup(channel_credentials, Some(rest_credentials)).await?;
/// context.enqueue_outbound(OutboundMessage::new("bot", "user-1", "hello"));
///
/// context.shutdown().await;
/// ```
pub struct MessagingContext {
    outbound_queue: Arc<WorkQueue<OutboundMessage>>,
    rest_queue: Arc<WorkQueue<RestMessage>>,
    inbound_queue: Arc<WorkQueue<InboundMessage>>,
    outbound_pool: WorkerPool,
    rest_pool: WorkerPool,
    inbound_pool: WorkerPool,
    lifecycle: ConnectionLifecycle,
    sender: Arc<AuthenticatedRetrySender>,
    inbound_handler: Arc<dyn WorkHandler<InboundMessage>>,
    dispatchers: Mutex<Vec<DispatchHandle>>,
}

impl MessagingContext {
    pub fn new(config: MessagingConfig, collaborators: Collaborators) -> Result<Self, ContextError> {
        config.validate()?;

        let lifecycle =
            ConnectionLifecycle::new(config.connection.clone(), collaborators.channel_factory);
        let authenticator = Arc::new(TokenAuthenticator::new(
            collaborators.credential_exchange,
            &config.auth,
        ));
        let sender = Arc::new(AuthenticatedRetrySender::new(
            collaborators.rest_transport,
            authenticator,
            collaborators.audit,
        ));

        Ok(Self {
            outbound_queue: Arc::new(WorkQueue::new("outbound")),
            rest_queue: Arc::new(WorkQueue::new("rest")),
            inbound_queue: Arc::new(WorkQueue::new("inbound")),
            outbound_pool: WorkerPool::new(config.outbound_pool)?,
            rest_pool: WorkerPool::new(config.rest_pool)?,
            inbound_pool: WorkerPool::new(config.inbound_pool)?,
            lifecycle,
            sender,
            inbound_handler: collaborators.inbound_handler,
            dispatchers: Mutex::new(Vec::new()),
        })
    }

    /// Bring everything up
    ///
    /// REST authentication failure is logged, not returned: sends keep
    /// failing with auth errors until a later `authenticate_rest` succeeds.
    /// If the channel cannot be connected the pools and dispatch loops are
    /// stopped again, so `startup` can be retried.
    #[instrument(skip_all)]
    pub async fn startup(
        &self,
        channel_credentials: ChannelCredentials,
        rest_credentials: Option<Credentials>,
    ) -> Result<(), ContextError> {
        if !self.dispatchers.lock().is_empty() {
            return Err(ContextError::AlreadyStarted);
        }

        self.outbound_pool.start()?;
        self.rest_pool.start()?;
        self.inbound_pool.start()?;

        let outbound_gate: Arc<dyn DispatchGate> = Arc::new(self.lifecycle.clone());
        let handles = vec![
            DispatchLoop::spawn(
                Arc::clone(&self.outbound_queue),
                self.outbound_pool.clone(),
                outbound_gate,
                Arc::new(OutboundHandler {
                    lifecycle: self.lifecycle.clone(),
                }),
            ),
            DispatchLoop::spawn(
                Arc::clone(&self.rest_queue),
                self.rest_pool.clone(),
                Arc::new(OpenGate),
                Arc::new(RestHandler {
                    sender: Arc::clone(&self.sender),
                }),
            ),
            DispatchLoop::spawn(
                Arc::clone(&self.inbound_queue),
                self.inbound_pool.clone(),
                Arc::new(OpenGate),
                Arc::clone(&self.inbound_handler),
            ),
        ];
        self.dispatchers.lock().extend(handles);

        let sink = Arc::new(QueueSink {
            queue: Arc::clone(&self.inbound_queue),
        });
        if let Err(e) = self.lifecycle.initialize(channel_credentials, sink).await {
            warn!(error = %e, "Channel connect failed, stopping workers");
            self.stop_workers().await;
            return Err(e.into());
        }

        if let Some(credentials) = rest_credentials {
            if let Err(e) = self.authenticate_rest(&credentials).await {
                warn!(error = %e, "REST authentication failed at startup");
            }
        }

        info!("Messaging context started");
        Ok(())
    }

    /// Tear everything down; queued items that were not dispatched are dropped
    #[instrument(skip_all)]
    pub async fn shutdown(&self) {
        self.stop_workers().await;

        match self.lifecycle.disconnect().await {
            Ok(()) | Err(LifecycleError::NotConnected) => {}
            Err(e) => warn!(error = %e, "Disconnect failed"),
        }

        info!("Messaging context stopped");
    }

    pub fn enqueue_outbound(&self, message: OutboundMessage) -> bool {
        self.outbound_queue.enqueue(message)
    }

    pub fn enqueue_inbound(&self, message: InboundMessage) -> bool {
        self.inbound_queue.enqueue(message)
    }

    pub fn enqueue_rest(&self, message: RestMessage) -> bool {
        self.rest_queue.enqueue(message)
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.lifecycle.connection_status()
    }

    pub async fn authenticate_rest(&self, credentials: &Credentials) -> Result<(), AuthError> {
        self.sender.authenticator().authenticate(credentials).await
    }

    /// Send directly, bypassing the REST queue
    pub async fn send_rest(&self, message: &RestMessage) -> Result<StatusCode, RestSendError> {
        self.sender.send(message).await
    }

    /// Send once with a user's own token, bypassing the REST queue
    pub async fn send_rest_with_token(
        &self,
        token: &str,
        message: &RestMessage,
    ) -> Result<StatusCode, RestSendError> {
        self.sender.send_with_token(token, message).await
    }

    /// Stop dispatch loops, then drain the pools
    async fn stop_workers(&self) {
        let dispatchers: Vec<_> = self.dispatchers.lock().drain(..).collect();
        for dispatcher in dispatchers {
            dispatcher.shutdown().await;
        }

        for pool in [&self.outbound_pool, &self.rest_pool, &self.inbound_pool] {
            if let Err(e) = pool.shutdown().await {
                warn!(pool = %pool.name(), error = %e, "Worker pool did not drain");
            }
        }
    }

    pub fn lifecycle(&self) -> &ConnectionLifecycle {
        &self.lifecycle
    }

    pub fn authenticator(&self) -> &Arc<TokenAuthenticator> {
        self.sender.authenticator()
    }

    pub fn outbound_queue_size(&self) -> usize {
        self.outbound_queue.size()
    }

    pub fn rest_queue_size(&self) -> usize {
        self.rest_queue.size()
    }

    pub fn inbound_queue_size(&self) -> usize {
        self.inbound_queue.size()
    }

    pub fn outbound_stats(&self) -> PoolStats {
        self.outbound_pool.stats()
    }

    pub fn rest_stats(&self) -> PoolStats {
        self.rest_pool.stats()
    }

    pub fn inbound_stats(&self) -> PoolStats {
        self.inbound_pool.stats()
    }
}
