// ABOUTME: Mock transport for testing - scripted replies and failure injection.
// ABOUTME: A cloned MockTransport stays a live controller for the channel it opened.
//!
//! # Example
//!
//! ```no_run
//! use tutorchat_transport::backends::mock::MockTransport;
//! use tutorchat_transport::{ChannelAddress, SessionContext, Transport};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mock = MockTransport::new()
//!     .on_send("hello").respond_text("Hi there!")
//!     .fail_next_opens(1);
//!
//! let ctx = SessionContext::new("tutor", "s-1");
//! let address = ChannelAddress::for_session("ws://mock/", &ctx)?;
//! assert!(mock.open(&address, &ctx).await.is_err());
//! let channel = mock.open(&address, &ctx).await?;
//! # drop(channel);
//! # Ok(())
//! # }
//! ```

use crate::address::{ChannelAddress, SessionContext};
use crate::event::{now_millis, ContentKind, InboundEvent, OutboundEvent};
use crate::handle::{Channel, ChannelEvent, ChannelHandle, Command, EventReceiver};
use crate::traits::Transport;
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

struct Expectation {
    pattern: String,
    replies: Vec<InboundEvent>,
}

#[derive(Default)]
struct MockState {
    expectations: VecDeque<Expectation>,
    sent: Vec<OutboundEvent>,
    failing_opens: usize,
    open_delay: Option<Duration>,
    fail_sends: bool,
    echo_unmatched: bool,
    opens: usize,
    generation: u64,
    /// Inbound side of the most recently opened channel
    live: Option<(u64, mpsc::Sender<ChannelEvent>)>,
}

/// Scriptable in-process transport
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockTransport {
    /// Mock that stays silent unless an expectation matches
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock that answers unmatched sends with a canned reply
    pub fn echo() -> Self {
        let mock = Self::new();
        lock(&mock.state).echo_unmatched = true;
        mock
    }

    /// Set up replies for the next send whose content contains `pattern`
    pub fn on_send(self, pattern: &str) -> ExpectationBuilder {
        ExpectationBuilder {
            transport: self,
            pattern: pattern.to_string(),
        }
    }

    /// Make the next `count` opens fail
    pub fn fail_next_opens(self, count: usize) -> Self {
        lock(&self.state).failing_opens = count;
        self
    }

    /// Delay every open by `delay` before it resolves
    pub fn with_open_delay(self, delay: Duration) -> Self {
        lock(&self.state).open_delay = Some(delay);
        self
    }

    /// Toggle send failure at runtime
    pub fn set_fail_sends(&self, fail: bool) {
        lock(&self.state).fail_sends = fail;
    }

    /// Everything the backend accepted, in order
    pub fn sent(&self) -> Vec<OutboundEvent> {
        lock(&self.state).sent.clone()
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state).opens
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).live.is_some()
    }

    /// Deliver an event as if the remote agent had sent it
    pub async fn inject(&self, event: InboundEvent) -> Result<()> {
        let sender = lock(&self.state)
            .live
            .as_ref()
            .map(|(_, tx)| tx.clone())
            .ok_or_else(|| anyhow::anyhow!("No open mock channel"))?;
        sender
            .send(ChannelEvent::Inbound(event))
            .await
            .map_err(|_| anyhow::anyhow!("Mock channel receiver dropped"))
    }

    /// Simulate the remote end dropping the channel
    pub async fn drop_connection(&self, reason: &str) {
        let live = lock(&self.state).live.take();
        if let Some((_, sender)) = live {
            let _ = sender
                .send(ChannelEvent::Failed {
                    reason: reason.to_string(),
                })
                .await;
        }
    }

    /// Factory function for the registry
    pub fn factory() -> crate::registry::TransportFactory {
        Box::new(|_config: &crate::config::TransportConfig| -> Result<Arc<dyn Transport>> {
            Ok(Arc::new(MockTransport::echo()))
        })
    }

    fn take_replies(state: &mut MockState, content: &str) -> Vec<InboundEvent> {
        // FIFO preference, falling back to the first matching expectation
        let matched = match state.expectations.front() {
            Some(front) if content.contains(&front.pattern) => state.expectations.pop_front(),
            Some(_) => state
                .expectations
                .iter()
                .position(|e| content.contains(&e.pattern))
                .and_then(|i| state.expectations.remove(i)),
            None => None,
        };

        match matched {
            Some(expectation) => expectation.replies,
            None if state.echo_unmatched => vec![InboundEvent::message(
                "",
                format!("Mock: no expectation for '{}'", content),
                ContentKind::Text,
            )],
            None => Vec::new(),
        }
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn open<'a>(
        &'a self,
        _address: &'a ChannelAddress,
        context: &'a SessionContext,
    ) -> BoxFuture<'a, Result<Channel>> {
        Box::pin(async move {
            let (delay, fail) = {
                let mut state = lock(&self.state);
                state.opens += 1;
                let fail = state.failing_opens > 0;
                if fail {
                    state.failing_opens -= 1;
                }
                (state.open_delay, fail)
            };

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if fail {
                anyhow::bail!("Mock open failure");
            }

            let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(32);
            let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(256);
            let generation = {
                let mut state = lock(&self.state);
                state.generation += 1;
                state.live = Some((state.generation, event_tx.clone()));
                state.generation
            };

            let state = Arc::clone(&self.state);
            let agent_id = context.agent_id.clone();
            tokio::spawn(async move {
                while let Some(cmd) = cmd_rx.recv().await {
                    match cmd {
                        Command::Send { event, reply } => {
                            let outcome = {
                                let mut state = lock(&state);
                                if state.fail_sends {
                                    None
                                } else {
                                    state.sent.push(event.clone());
                                    Some(Self::take_replies(&mut state, event.content()))
                                }
                            };
                            let Some(replies) = outcome else {
                                let _ = reply.send(Err(anyhow::anyhow!("Mock send failure")));
                                continue;
                            };
                            let _ = reply.send(Ok(()));

                            for mut reply_event in replies {
                                if reply_event.agent_id.is_empty() {
                                    reply_event.agent_id = agent_id.clone();
                                }
                                reply_event.timestamp = now_millis();
                                if event_tx.send(ChannelEvent::Inbound(reply_event)).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Command::Close { reply } => {
                            let mut guard = lock(&state);
                            if matches!(guard.live, Some((g, _)) if g == generation) {
                                guard.live = None;
                            }
                            drop(guard);
                            let _ = reply.send(());
                            break;
                        }
                    }
                }
            });

            Ok(Channel {
                handle: ChannelHandle::new(cmd_tx, "mock"),
                events: EventReceiver::new(event_rx),
            })
        })
    }
}

/// Builder for setting up mock replies with a fluent API
pub struct ExpectationBuilder {
    transport: MockTransport,
    pattern: String,
}

impl ExpectationBuilder {
    /// Reply with a list of inbound events. Events with an empty agent id
    /// are attributed to the session's agent.
    pub fn respond_with(self, replies: Vec<InboundEvent>) -> MockTransport {
        lock(&self.transport.state).expectations.push_back(Expectation {
            pattern: self.pattern,
            replies,
        });
        self.transport
    }

    /// Reply with a single text message
    pub fn respond_text(self, text: &str) -> MockTransport {
        self.respond_with(vec![InboundEvent::message("", text, ContentKind::Text)])
    }

    /// Accept the send without replying
    pub fn respond_nothing(self) -> MockTransport {
        self.respond_with(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventPayload, OutboundMessage};

    fn outbound(content: &str) -> OutboundEvent {
        OutboundEvent::message(OutboundMessage {
            content: content.to_string(),
            message_type: ContentKind::Text,
            code_language: None,
            session_id: "s".to_string(),
            message_id: None,
            attachments: Vec::new(),
        })
    }

    async fn open(mock: &MockTransport) -> Result<Channel> {
        let ctx = SessionContext::new("tutor", "s");
        let address = ChannelAddress::for_session("ws://mock/", &ctx)?;
        mock.open(&address, &ctx).await
    }

    #[tokio::test]
    async fn test_scripted_reply_attributed_to_agent() {
        let mock = MockTransport::new().on_send("hello").respond_text("Hi there!");
        let mut channel = open(&mock).await.unwrap();

        channel.handle.send(outbound("hello tutor")).await.unwrap();
        match channel.events.recv().await {
            Some(ChannelEvent::Inbound(event)) => {
                assert_eq!(event.agent_id, "tutor");
                match event.payload {
                    EventPayload::Message(p) => assert_eq!(p.content, "Hi there!"),
                    other => panic!("unexpected payload {:?}", other),
                }
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(mock.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_silent_mock_replies_nothing() {
        let mock = MockTransport::new();
        let mut channel = open(&mock).await.unwrap();
        channel.handle.send(outbound("anything")).await.unwrap();
        assert!(channel.events.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_echo_mock_answers_unmatched() {
        let mock = MockTransport::echo();
        let mut channel = open(&mock).await.unwrap();
        channel.handle.send(outbound("ping")).await.unwrap();
        assert!(matches!(
            channel.events.recv().await,
            Some(ChannelEvent::Inbound(_))
        ));
    }

    #[tokio::test]
    async fn test_failing_open_then_success() {
        let mock = MockTransport::new().fail_next_opens(1);
        assert!(open(&mock).await.is_err());
        assert!(open(&mock).await.is_ok());
        assert_eq!(mock.open_count(), 2);
    }

    #[tokio::test]
    async fn test_send_failure_not_recorded() {
        let mock = MockTransport::new();
        let channel = open(&mock).await.unwrap();
        mock.set_fail_sends(true);
        assert!(channel.handle.send(outbound("hi")).await.is_err());
        assert!(mock.sent().is_empty());
    }

    #[tokio::test]
    async fn test_close_releases_live_channel() {
        let mock = MockTransport::new();
        let channel = open(&mock).await.unwrap();
        assert!(mock.is_open());
        channel.handle.close().await;
        assert!(!mock.is_open());
        assert!(mock.inject(InboundEvent::status("tutor", "online")).await.is_err());
    }
}
