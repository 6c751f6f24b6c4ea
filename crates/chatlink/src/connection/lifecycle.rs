//! Connect / keep-alive / reconnect state machine for the persistent channel

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::transport::{ChannelFactory, InboundSink, TransportChannel, TransportError};
use crate::duration_millis;
use crate::message::OutboundMessage;
use crate::queue::DispatchGate;
use crate::reliability::BackoffPolicy;

/// Persistent channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Health summary exposed to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    /// A channel handle is live and no reconnect is in progress
    pub is_running: bool,
    pub is_reconnecting: bool,
}

/// What `send` does while a reconnect is in progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectSendPolicy {
    /// Try the send anyway; it fails with `NotConnected` once the stale handle is gone
    #[default]
    Attempt,
    /// Reject without touching the transport
    FailFast,
}

/// Persistent channel settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Keep-alive period
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,

    /// Backoff between connect and reconnect attempts
    pub reconnect_backoff: BackoffPolicy,

    pub send_policy: ReconnectSendPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(90),
            reconnect_backoff: BackoffPolicy::unbounded(Duration::from_secs(60)),
            send_policy: ReconnectSendPolicy::Attempt,
        }
    }
}

impl ConnectionConfig {
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn with_send_policy(mut self, policy: ReconnectSendPolicy) -> Self {
        self.send_policy = policy;
        self
    }
}

/// Application id and secret for the persistent channel
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelCredentials {
    pub app_id: String,
    pub secret: String,
}

impl ChannelCredentials {
    pub fn new(app_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for ChannelCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelCredentials")
            .field("app_id", &self.app_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Connect called while a session exists
    #[error("channel is already connected")]
    AlreadyConnected,

    /// No live channel handle
    #[error("channel is not connected")]
    NotConnected,

    /// Connect called before credentials were provided
    #[error("channel credentials have not been initialized")]
    NotInitialized,

    /// Send rejected under [`ReconnectSendPolicy::FailFast`]
    #[error("channel is reconnecting")]
    Reconnecting,

    /// An in-flight connect was abandoned by `disconnect`
    #[error("connect was cancelled")]
    Cancelled,

    /// Classified transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result of a single heartbeat tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Keep-alive delivered
    Sent,
    /// Not connected, reconnecting, or another heartbeat still in flight
    Skipped,
    /// Keep-alive failed and a reconnect was triggered
    Failed(TransportError),
}

struct Inner {
    config: ConnectionConfig,
    factory: Arc<dyn ChannelFactory>,
    credentials: RwLock<Option<ChannelCredentials>>,
    sink: RwLock<Option<Arc<dyn InboundSink>>>,
    channel: RwLock<Option<Arc<dyn TransportChannel>>>,
    state: RwLock<ConnectionState>,
    /// Serializes connect, disconnect and handle installation
    lifecycle_lock: tokio::sync::Mutex<()>,
    reconnecting: AtomicBool,
    reconnecting_tx: watch::Sender<bool>,
    /// Bumped to abandon the connect loop holding `lifecycle_lock`
    connect_cancel: watch::Sender<u64>,
    heartbeat_in_flight: AtomicBool,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write();
        if *state != next {
            debug!(from = ?*state, to = ?next, "Connection state changed");
            *state = next;
        }
    }

    fn stop_heartbeat(&self) {
        if let Some(task) = self.heartbeat_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

/// Clears the reconnecting flag when the reconnect task ends or is aborted
struct ReconnectGuard {
    inner: Arc<Inner>,
}

impl Drop for ReconnectGuard {
    fn drop(&mut self) {
        if self.inner.state() == ConnectionState::Reconnecting {
            self.inner.set_state(ConnectionState::Disconnected);
        }
        self.inner.reconnecting.store(false, Ordering::Release);
        self.inner.reconnecting_tx.send_replace(false);
    }
}

struct HeartbeatGuard<'a>(&'a AtomicBool);

impl Drop for HeartbeatGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owner of the persistent channel handle
///
/// Cloning is cheap; clones share the same handle and state. At most one
/// reconnect runs at a time: the first failing caller starts it in the
/// background and every other caller returns immediately.
///
/// # Example
///
/// ```ignore
/// use chatlink::connection::{ChannelCredentials, ConnectionConfig, ConnectionLifecycle};
///
/// let lifecycle = ConnectionLifecycle::new(ConnectionConfig::default(), factory);
/// lifecycle
///     .initialize(ChannelCredentials::new("app", "secret"), sink)
///     .await?;
///
/// lifecycle.send(&OutboundMessage::new("app", "user-1", "hello")).await?;
/// lifecycle.disconnect().await?;
/// ```
#[derive(Clone)]
pub struct ConnectionLifecycle {
    inner: Arc<Inner>,
}

impl ConnectionLifecycle {
    pub fn new(config: ConnectionConfig, factory: Arc<dyn ChannelFactory>) -> Self {
        let (reconnecting_tx, _) = watch::channel(false);
        let (connect_cancel, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                credentials: RwLock::new(None),
                sink: RwLock::new(None),
                channel: RwLock::new(None),
                state: RwLock::new(ConnectionState::Disconnected),
                lifecycle_lock: tokio::sync::Mutex::new(()),
                reconnecting: AtomicBool::new(false),
                reconnecting_tx,
                connect_cancel,
                heartbeat_in_flight: AtomicBool::new(false),
                heartbeat_task: Mutex::new(None),
                reconnect_task: Mutex::new(None),
            }),
        }
    }

    /// Store credentials and inbound sink, then connect
    pub async fn initialize(
        &self,
        credentials: ChannelCredentials,
        sink: Arc<dyn InboundSink>,
    ) -> Result<(), LifecycleError> {
        *self.inner.credentials.write() = Some(credentials);
        *self.inner.sink.write() = Some(sink);
        self.connect().await
    }

    /// Open the channel, retrying per the backoff policy
    ///
    /// Fails immediately if a session already exists. With the default
    /// unbounded policy this only returns once connected, or with
    /// [`LifecycleError::Cancelled`] when `disconnect` abandons it.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<(), LifecycleError> {
        let _lock = self.inner.lifecycle_lock.lock().await;

        if self.inner.state() != ConnectionState::Disconnected {
            return Err(LifecycleError::AlreadyConnected);
        }
        let (credentials, sink) = self.session_inputs()?;

        let mut cancel = self.inner.connect_cancel.subscribe();
        self.inner.set_state(ConnectionState::Connecting);
        let backoff = &self.inner.config.reconnect_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let opened = tokio::select! {
                _ = cancel.changed() => {
                    self.inner.set_state(ConnectionState::Disconnected);
                    info!(attempt, "Connect cancelled");
                    return Err(LifecycleError::Cancelled);
                }
                opened = async {
                    backoff.wait(attempt).await;
                    self.open_channel(&credentials, Arc::clone(&sink)).await
                } => opened,
            };

            match opened {
                Ok(channel) => {
                    *self.inner.channel.write() = Some(channel);
                    self.inner.set_state(ConnectionState::Connected);
                    self.start_heartbeat();
                    info!(attempt, app_id = %credentials.app_id, "Channel connected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Connect attempt failed");
                    if !backoff.has_attempts_remaining(attempt) {
                        self.inner.set_state(ConnectionState::Disconnected);
                        return Err(e.into());
                    }
                }
            }
        }
    }

    /// Stop the heartbeat and close the channel
    ///
    /// Cancels a reconnect in progress. Called while still connecting, it
    /// abandons that connect and fails with `NotConnected`.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<(), LifecycleError> {
        if self.inner.state() == ConnectionState::Connecting {
            self.inner
                .connect_cancel
                .send_modify(|epoch| *epoch = epoch.wrapping_add(1));
        }
        let _lock = self.inner.lifecycle_lock.lock().await;

        if !matches!(
            self.inner.state(),
            ConnectionState::Connected | ConnectionState::Reconnecting
        ) {
            return Err(LifecycleError::NotConnected);
        }

        self.inner.stop_heartbeat();

        let reconnect = self.inner.reconnect_task.lock().take();
        if let Some(task) = reconnect {
            task.abort();
            // The aborted task drops its guard, clearing the reconnecting flag
            let _ = task.await;
        }

        self.inner.set_state(ConnectionState::Disconnected);
        let channel = self.inner.channel.write().take();
        if let Some(channel) = channel {
            if let Err(e) = channel.disconnect().await {
                warn!(error = %e, "Channel disconnect failed");
            }
            channel.close().await;
        }

        info!("Channel disconnected");
        Ok(())
    }

    /// Reconnect and wait for the outcome
    ///
    /// Returns `Ok(false)` without doing anything when another reconnect is
    /// already running, and `NotConnected` when the reconnect gave up or was
    /// cancelled by `disconnect`.
    #[instrument(skip(self))]
    pub async fn reconnect(&self) -> Result<bool, LifecycleError> {
        if !self.trigger_reconnect()? {
            return Ok(false);
        }

        let mut rx = self.subscribe_reconnecting();
        let _ = rx.wait_for(|reconnecting| !*reconnecting).await;

        match self.inner.state() {
            ConnectionState::Connected => Ok(true),
            _ => Err(LifecycleError::NotConnected),
        }
    }

    /// Send a message on the live handle
    ///
    /// A classified transport failure starts a background reconnect and is
    /// reported to the caller; the send itself is not retried.
    pub async fn send(&self, message: &OutboundMessage) -> Result<(), LifecycleError> {
        if self.is_reconnecting() && self.inner.config.send_policy == ReconnectSendPolicy::FailFast
        {
            return Err(LifecycleError::Reconnecting);
        }

        let channel = self
            .current_channel()
            .ok_or(LifecycleError::NotConnected)?;

        match channel.send(message).await {
            Ok(()) => {
                debug!(to = %message.to, "Message sent");
                Ok(())
            }
            Err(e) => {
                warn!(to = %message.to, kind = ?e.kind, error = %e, "Send failed");
                let _ = self.trigger_reconnect();
                Err(e.into())
            }
        }
    }

    /// Run one keep-alive
    ///
    /// Called by the heartbeat task every `heartbeat_interval`.
    pub async fn heartbeat(&self) -> HeartbeatOutcome {
        if self.inner.state() != ConnectionState::Connected || self.is_reconnecting() {
            return HeartbeatOutcome::Skipped;
        }

        if self
            .inner
            .heartbeat_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Heartbeat still in flight, skipping tick");
            return HeartbeatOutcome::Skipped;
        }
        let _guard = HeartbeatGuard(&self.inner.heartbeat_in_flight);

        let Some(channel) = self.current_channel() else {
            return HeartbeatOutcome::Skipped;
        };

        match channel.keep_alive().await {
            Ok(()) => {
                debug!("Keep-alive sent");
                HeartbeatOutcome::Sent
            }
            Err(e) => {
                warn!(kind = ?e.kind, error = %e, "Keep-alive failed");
                let _ = self.trigger_reconnect();
                HeartbeatOutcome::Failed(e)
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner.reconnecting.load(Ordering::Acquire)
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        let is_reconnecting = self.is_reconnecting();
        ConnectionStatus {
            is_running: self.inner.channel.read().is_some() && !is_reconnecting,
            is_reconnecting,
        }
    }

    /// Observe the reconnecting flag
    pub fn subscribe_reconnecting(&self) -> watch::Receiver<bool> {
        self.inner.reconnecting_tx.subscribe()
    }

    fn current_channel(&self) -> Option<Arc<dyn TransportChannel>> {
        self.inner.channel.read().clone()
    }

    fn session_inputs(&self) -> Result<(ChannelCredentials, Arc<dyn InboundSink>), LifecycleError> {
        let credentials = self
            .inner
            .credentials
            .read()
            .clone()
            .ok_or(LifecycleError::NotInitialized)?;
        let sink = self
            .inner
            .sink
            .read()
            .clone()
            .ok_or(LifecycleError::NotInitialized)?;
        Ok((credentials, sink))
    }

    /// Create a fresh handle and connect it; a handle that fails to connect is closed
    async fn open_channel(
        &self,
        credentials: &ChannelCredentials,
        sink: Arc<dyn InboundSink>,
    ) -> Result<Arc<dyn TransportChannel>, TransportError> {
        let channel = self.inner.factory.create()?;
        match channel
            .connect(&credentials.app_id, &credentials.secret, sink)
            .await
        {
            Ok(()) => Ok(channel),
            Err(e) => {
                channel.close().await;
                Err(e)
            }
        }
    }

    /// Claim the reconnect slot and run the reconnect on its own task
    ///
    /// Returns `Ok(false)` if a reconnect already holds the slot.
    fn trigger_reconnect(&self) -> Result<bool, LifecycleError> {
        if self
            .inner
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Reconnect already in progress");
            return Ok(false);
        }
        let guard = ReconnectGuard {
            inner: Arc::clone(&self.inner),
        };

        if self.inner.state() != ConnectionState::Connected {
            // Dropping the guard releases the slot without touching the state
            drop(guard);
            return Err(LifecycleError::NotConnected);
        }

        self.inner.set_state(ConnectionState::Reconnecting);
        self.inner.reconnecting_tx.send_replace(true);

        let lifecycle = self.clone();
        let mut slot = self.inner.reconnect_task.lock();
        *slot = Some(tokio::spawn(async move {
            lifecycle.run_reconnect().await;
            drop(guard);
        }));
        Ok(true)
    }

    async fn run_reconnect(&self) {
        info!("Reconnecting channel");

        let stale = self.inner.channel.write().take();
        if let Some(stale) = stale {
            if let Err(e) = stale.disconnect().await {
                debug!(error = %e, "Stale channel disconnect failed");
            }
            stale.close().await;
        }

        let (credentials, sink) = match self.session_inputs() {
            Ok(inputs) => inputs,
            Err(e) => {
                error!(error = %e, "Cannot reconnect");
                return;
            }
        };

        let backoff = &self.inner.config.reconnect_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            backoff.wait(attempt).await;

            match self.open_channel(&credentials, Arc::clone(&sink)).await {
                Ok(channel) => {
                    let _lock = self.inner.lifecycle_lock.lock().await;
                    if self.inner.state() != ConnectionState::Reconnecting {
                        channel.close().await;
                        return;
                    }
                    *self.inner.channel.write() = Some(channel);
                    self.inner.set_state(ConnectionState::Connected);
                    self.start_heartbeat();
                    info!(attempt, "Channel reconnected");
                    return;
                }
                Err(e) => {
                    warn!(
                        attempt,
                        error = %e,
                        retry_in_ms = backoff.interval.as_millis() as u64,
                        "Reconnect attempt failed"
                    );
                    if !backoff.has_attempts_remaining(attempt) {
                        error!(attempt, "Giving up on reconnect");
                        return;
                    }
                }
            }
        }
    }

    /// (Re)start the heartbeat task; the first tick fires one period from now
    fn start_heartbeat(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.heartbeat_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                ConnectionLifecycle { inner }.heartbeat().await;
            }
        });

        if let Some(previous) = self.inner.heartbeat_task.lock().replace(task) {
            previous.abort();
        }
    }
}

#[async_trait]
impl DispatchGate for ConnectionLifecycle {
    fn is_paused(&self) -> bool {
        self.is_reconnecting()
    }

    async fn wait_until_open(&self) {
        let mut rx = self.subscribe_reconnecting();
        let _ = rx.wait_for(|reconnecting| !*reconnecting).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(90));
        assert!(config.reconnect_backoff.is_unbounded());
        assert_eq!(config.reconnect_backoff.interval, Duration::from_secs(60));
        assert_eq!(config.send_policy, ReconnectSendPolicy::Attempt);
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let credentials = ChannelCredentials::new("app-1", "hunter2");
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("app-1"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_send_policy_serde() {
        let json = serde_json::to_string(&ReconnectSendPolicy::FailFast).unwrap();
        assert_eq!(json, "\"fail_fast\"");
    }
}
