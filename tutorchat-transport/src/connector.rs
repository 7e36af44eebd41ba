// ABOUTME: Transport connector owning the lifecycle of one logical channel to the agent.
// ABOUTME: Connection state machine, per-kind handler dispatch, open timeout, teardown and reconnect.

use crate::address::{ChannelAddress, SessionContext};
use crate::backoff::{BackoffState, ReconnectPolicy};
use crate::event::{EventKind, InboundEvent, OutboundEvent};
use crate::handle::{Channel, ChannelEvent, ChannelHandle, EventReceiver};
use crate::traits::Transport;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Connection status of the channel, gating outbound sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The channel dropped and a reconnect is in progress
    Degraded,
}

impl ConnectionState {
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Upper bound on a single channel open
    pub open_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Callback invoked for each inbound event of a subscribed kind
pub type EventHandler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type HandlerMap = HashMap<EventKind, Vec<(SubscriptionId, EventHandler)>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: ConnectorConfig,
    state: watch::Sender<ConnectionState>,
    handlers: Mutex<HandlerMap>,
    next_subscription: AtomicU64,
    channel: Mutex<Option<ChannelHandle>>,
    /// Cancelled on disconnect; replaced on each connect
    cancel: Mutex<CancellationToken>,
}

/// Owns one logical channel to a remote conversational agent.
///
/// Cloning yields another handle onto the same connector, so send tasks
/// and the owning engine observe one state machine.
#[derive(Clone)]
pub struct TransportConnector {
    inner: Arc<Inner>,
}

impl TransportConnector {
    pub fn new(transport: Arc<dyn Transport>, config: ConnectorConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                state,
                handlers: Mutex::new(HashMap::new()),
                next_subscription: AtomicU64::new(1),
                channel: Mutex::new(None),
                cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn transport_name(&self) -> &'static str {
        self.inner.transport.name()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Observe state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Register a handler for one inbound event kind
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.handlers)
            .entry(kind)
            .or_default()
            .push((id, handler));
        tracing::debug!(kind = %kind, subscription = id.0, "Handler subscribed");
        id
    }

    /// Remove one handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = lock(&self.inner.handlers);
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(sub, _)| *sub != id);
            removed |= list.len() != before;
        }
        removed
    }

    pub fn unsubscribe_all(&self) {
        lock(&self.inner.handlers).clear();
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.handlers).values().map(Vec::len).sum()
    }

    /// Open the channel for a session and start delivering inbound events.
    ///
    /// Failure is not an error: the connector lands in `Disconnected` and
    /// the caller surfaces it.
    pub async fn connect(
        &self,
        address: &ChannelAddress,
        context: &SessionContext,
    ) -> ConnectionState {
        let current = self.state();
        if current != ConnectionState::Disconnected {
            tracing::debug!(state = %current, "Connect ignored, channel already active");
            return current;
        }

        let cancel = CancellationToken::new();
        *lock(&self.inner.cancel) = cancel.clone();
        self.inner.set_state(ConnectionState::Connecting);

        tracing::info!(
            transport = self.transport_name(),
            agent_id = %context.agent_id,
            session_id = %context.session_id,
            "Opening channel"
        );

        match self.inner.open_channel(address, context, &cancel).await {
            Ok(channel) => {
                if cancel.is_cancelled() {
                    channel.handle.close().await;
                    self.inner.set_state(ConnectionState::Disconnected);
                    return ConnectionState::Disconnected;
                }
                *lock(&self.inner.channel) = Some(channel.handle);
                self.inner.set_state(ConnectionState::Connected);
                tokio::spawn(pump(
                    Arc::clone(&self.inner),
                    channel.events,
                    cancel,
                    address.clone(),
                    context.clone(),
                ));
                ConnectionState::Connected
            }
            Err(e) => {
                tracing::warn!(error = %e, "Connection failed");
                self.inner.set_state(ConnectionState::Disconnected);
                ConnectionState::Disconnected
            }
        }
    }

    /// Emit an event on the open channel
    pub async fn send(&self, event: OutboundEvent) -> Result<()> {
        let state = self.state();
        if !state.can_send() {
            anyhow::bail!("Cannot send while {}", state);
        }
        let handle = lock(&self.inner.channel)
            .clone()
            .context("No open channel")?;
        handle
            .send(event)
            .await
            .with_context(|| format!("{} transport failed to send", handle.name()))
    }

    /// Unsubscribe every handler and close the channel.
    ///
    /// Safe to call mid-connect or mid-reconnect; no handler fires afterwards.
    pub async fn disconnect(&self) {
        lock(&self.inner.cancel).cancel();
        self.unsubscribe_all();
        let handle = lock(&self.inner.channel).take();
        if let Some(handle) = handle {
            handle.close().await;
        }
        self.inner.set_state(ConnectionState::Disconnected);
        tracing::info!(transport = self.transport_name(), "Channel disconnected");
    }
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Connection state changed");
        }
    }

    async fn open_channel(
        &self,
        address: &ChannelAddress,
        context: &SessionContext,
        cancel: &CancellationToken,
    ) -> Result<Channel> {
        let timeout = self.config.open_timeout;
        tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("Connect abandoned by teardown"),
            opened = tokio::time::timeout(timeout, self.transport.open(address, context)) => {
                opened.map_err(|_| anyhow::anyhow!("Timed out opening channel after {:?}", timeout))?
            }
        }
    }

    fn dispatch(&self, event: &InboundEvent, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        let kind = event.kind();
        metrics::counter!("tutorchat_inbound_events_total", "kind" => kind.as_str()).increment(1);

        // Clone out so handlers run without the lock held
        let handlers: Vec<EventHandler> = lock(&self.handlers)
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        if handlers.is_empty() {
            tracing::debug!(kind = %kind, "No handler for inbound event");
        }
        for handler in handlers {
            handler(event);
        }
    }

    /// Re-open after a drop. Returns the new receiver, or None when the
    /// policy is exhausted or teardown intervened.
    async fn reconnect(
        &self,
        address: &ChannelAddress,
        context: &SessionContext,
        cancel: &CancellationToken,
    ) -> Option<EventReceiver> {
        lock(&self.channel).take();
        if cancel.is_cancelled() {
            return None;
        }
        if !self.config.reconnect.is_enabled() {
            self.set_state(ConnectionState::Disconnected);
            return None;
        }

        self.set_state(ConnectionState::Degraded);
        let mut backoff = BackoffState::new(self.config.reconnect.clone());
        loop {
            let Some(delay) = backoff.record_failure() else {
                tracing::warn!(
                    attempts = backoff.consecutive_failures() - 1,
                    "Reconnect attempts exhausted"
                );
                if !cancel.is_cancelled() {
                    self.set_state(ConnectionState::Disconnected);
                }
                return None;
            };
            metrics::counter!("tutorchat_reconnect_attempts_total").increment(1);

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.open_channel(address, context, cancel).await {
                Ok(channel) => {
                    if cancel.is_cancelled() {
                        channel.handle.close().await;
                        return None;
                    }
                    backoff.record_success();
                    *lock(&self.channel) = Some(channel.handle);
                    self.set_state(ConnectionState::Connected);
                    tracing::info!("Channel re-established");
                    return Some(channel.events);
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    tracing::warn!(
                        attempt = backoff.consecutive_failures(),
                        error = %e,
                        "Reconnect attempt failed"
                    );
                }
            }
        }
    }
}

/// Forward inbound events to subscribers until teardown or terminal failure
async fn pump(
    inner: Arc<Inner>,
    mut events: EventReceiver,
    cancel: CancellationToken,
    address: ChannelAddress,
    context: SessionContext,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = events.recv() => next,
        };

        let reason = match next {
            Some(ChannelEvent::Inbound(event)) => {
                inner.dispatch(&event, &cancel);
                continue;
            }
            Some(ChannelEvent::Failed { reason }) => reason,
            None => "channel closed".to_string(),
        };

        if cancel.is_cancelled() {
            return;
        }
        tracing::warn!(reason = %reason, "Channel lost");
        match inner.reconnect(&address, &context, &cancel).await {
            Some(receiver) => events = receiver,
            None => return,
        }
    }
}
