// ABOUTME: Integration tests for TransportConnector against the mock transport
// ABOUTME: Covers state machine, handler dispatch, teardown, timeouts and reconnect

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tutorchat_transport::backends::mock::MockTransport;
use tutorchat_transport::{
    ChannelAddress, ConnectionState, ConnectorConfig, ContentKind, EventKind, InboundEvent,
    OutboundEvent, OutboundMessage, ReconnectPolicy, SessionContext, TransportConnector,
};

fn connector(mock: &MockTransport, config: ConnectorConfig) -> TransportConnector {
    TransportConnector::new(Arc::new(mock.clone()), config)
}

fn session() -> (ChannelAddress, SessionContext) {
    let ctx = SessionContext::new("python-tutor", "session-1");
    let address = ChannelAddress::for_session("ws://mock/ws/chat/", &ctx).unwrap();
    (address, ctx)
}

fn no_reconnect() -> ConnectorConfig {
    ConnectorConfig {
        open_timeout: Duration::from_secs(1),
        reconnect: ReconnectPolicy::disabled(),
    }
}

fn fast_reconnect(attempts: u32) -> ConnectorConfig {
    ConnectorConfig {
        open_timeout: Duration::from_secs(1),
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2,
            max_attempts: attempts,
        },
    }
}

fn outbound(content: &str) -> OutboundEvent {
    OutboundEvent::message(OutboundMessage {
        content: content.to_string(),
        message_type: ContentKind::Text,
        code_language: None,
        session_id: "session-1".to_string(),
        message_id: None,
        attachments: Vec::new(),
    })
}

/// Subscribe a handler that forwards matching events into a channel
fn collect(
    connector: &TransportConnector,
    kind: EventKind,
) -> mpsc::UnboundedReceiver<InboundEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    connector.subscribe(
        kind,
        Arc::new(move |event: &InboundEvent| {
            let _ = tx.send(event.clone());
        }),
    );
    rx
}

#[tokio::test]
async fn test_connect_transitions_to_connected() {
    let mock = MockTransport::new();
    let connector = connector(&mock, no_reconnect());
    let (address, ctx) = session();

    assert_eq!(connector.state(), ConnectionState::Disconnected);
    assert_eq!(connector.connect(&address, &ctx).await, ConnectionState::Connected);
    assert_eq!(connector.state(), ConnectionState::Connected);
    assert!(mock.is_open());
}

#[tokio::test]
async fn test_events_dispatched_by_kind() {
    let mock = MockTransport::new();
    let connector = connector(&mock, no_reconnect());
    let (address, ctx) = session();
    let mut messages = collect(&connector, EventKind::Message);
    let mut typing = collect(&connector, EventKind::Typing);

    connector.connect(&address, &ctx).await;
    mock.inject(InboundEvent::typing("python-tutor", true)).await.unwrap();
    mock.inject(InboundEvent::status("python-tutor", "online")).await.unwrap();
    mock.inject(InboundEvent::message("python-tutor", "hello", ContentKind::Text))
        .await
        .unwrap();

    let message = messages.recv().await.unwrap();
    assert_eq!(message.kind(), EventKind::Message);
    assert_eq!(typing.recv().await.unwrap().kind(), EventKind::Typing);
    // Status had no subscriber and must not leak into other handlers
    assert!(messages.try_recv().is_err());
    assert!(typing.try_recv().is_err());
}

#[tokio::test]
async fn test_open_failure_is_recoverable() {
    let mock = MockTransport::new().fail_next_opens(1);
    let connector = connector(&mock, no_reconnect());
    let (address, ctx) = session();

    assert_eq!(connector.connect(&address, &ctx).await, ConnectionState::Disconnected);
    // A later attempt succeeds
    assert_eq!(connector.connect(&address, &ctx).await, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_open_timeout() {
    let mock = MockTransport::new().with_open_delay(Duration::from_secs(60));
    let connector = connector(&mock, no_reconnect());
    let (address, ctx) = session();

    assert_eq!(connector.connect(&address, &ctx).await, ConnectionState::Disconnected);
    assert!(!mock.is_open());
}

#[tokio::test]
async fn test_send_requires_connection() {
    let mock = MockTransport::new();
    let connector = connector(&mock, no_reconnect());

    let err = connector.send(outbound("hi")).await.unwrap_err();
    assert!(err.to_string().contains("disconnected"));
    assert!(mock.sent().is_empty());
}

#[tokio::test]
async fn test_send_failure_leaves_state_alone() {
    let mock = MockTransport::new();
    let connector = connector(&mock, no_reconnect());
    let (address, ctx) = session();
    connector.connect(&address, &ctx).await;

    mock.set_fail_sends(true);
    assert!(connector.send(outbound("hi")).await.is_err());
    assert_eq!(connector.state(), ConnectionState::Connected);

    mock.set_fail_sends(false);
    connector.send(outbound("again")).await.unwrap();
    assert_eq!(mock.sent().len(), 1);
}

#[tokio::test]
async fn test_disconnect_unsubscribes_and_closes() {
    let mock = MockTransport::new();
    let connector = connector(&mock, no_reconnect());
    let (address, ctx) = session();
    let mut messages = collect(&connector, EventKind::Message);
    connector.connect(&address, &ctx).await;
    assert_eq!(connector.subscriber_count(), 1);

    connector.disconnect().await;

    assert_eq!(connector.subscriber_count(), 0);
    assert_eq!(connector.state(), ConnectionState::Disconnected);
    assert!(!mock.is_open());
    assert!(mock
        .inject(InboundEvent::message("python-tutor", "late", ContentKind::Text))
        .await
        .is_err());
    // Handler was dropped with the subscription
    assert!(messages.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_teardown_mid_connect() {
    let mock = MockTransport::new().with_open_delay(Duration::from_millis(500));
    let connector = connector(
        &mock,
        ConnectorConfig {
            open_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::disabled(),
        },
    );
    let (address, ctx) = session();

    let connecting = {
        let connector = connector.clone();
        tokio::spawn(async move { connector.connect(&address, &ctx).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.state(), ConnectionState::Connecting);

    connector.disconnect().await;

    assert_eq!(connecting.await.unwrap(), ConnectionState::Disconnected);
    assert_eq!(connector.state(), ConnectionState::Disconnected);
    assert!(!mock.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_drop() {
    let mock = MockTransport::new();
    let connector = connector(&mock, fast_reconnect(3));
    let (address, ctx) = session();
    let mut messages = collect(&connector, EventKind::Message);
    connector.connect(&address, &ctx).await;

    let mut state_rx = connector.watch_state();
    let observed = tokio::spawn(async move {
        let mut seen = Vec::new();
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow_and_update();
            seen.push(state);
            if state == ConnectionState::Connected {
                break;
            }
        }
        seen
    });

    mock.drop_connection("server restart").await;
    let seen = observed.await.unwrap();
    assert_eq!(seen, vec![ConnectionState::Degraded, ConnectionState::Connected]);
    assert_eq!(mock.open_count(), 2);

    // Handlers survive the reconnect
    mock.inject(InboundEvent::message("python-tutor", "back", ContentKind::Text))
        .await
        .unwrap();
    assert_eq!(messages.recv().await.unwrap().agent_id, "python-tutor");
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_exhaustion_lands_disconnected() {
    let mock = MockTransport::new();
    let connector = connector(&mock, fast_reconnect(2));
    let (address, ctx) = session();
    connector.connect(&address, &ctx).await;

    let _ = mock.clone().fail_next_opens(5);
    mock.drop_connection("gone").await;

    let mut state_rx = connector.watch_state();
    state_rx
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();
    // One initial open plus two failed retries
    assert_eq!(mock.open_count(), 3);
}

#[tokio::test]
async fn test_drop_without_reconnect_policy() {
    let mock = MockTransport::new();
    let connector = connector(&mock, no_reconnect());
    let (address, ctx) = session();
    connector.connect(&address, &ctx).await;

    mock.drop_connection("gone").await;
    let mut state_rx = connector.watch_state();
    state_rx
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();
    assert_eq!(mock.open_count(), 1);
}

#[tokio::test]
async fn test_unsubscribe_single_handler() {
    let mock = MockTransport::new();
    let connector = connector(&mock, no_reconnect());
    let id = connector.subscribe(EventKind::Status, Arc::new(|_event: &InboundEvent| {}));
    assert_eq!(connector.subscriber_count(), 1);
    assert!(connector.unsubscribe(id));
    assert!(!connector.unsubscribe(id));
    assert_eq!(connector.subscriber_count(), 0);
}
