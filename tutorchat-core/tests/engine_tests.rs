// ABOUTME: Integration tests for ChatEngine against the mock transport and in-memory capabilities
// ABOUTME: Covers send/ack/failure, inbound replay, capacity, search, persistence, teardown and export

use std::sync::Arc;
use tutorchat_core::capabilities::{Capabilities, LocalFile, MemoryClipboard};
use tutorchat_core::durability::{history_key, KeyValueStore, MemoryKeyValueStore};
use tutorchat_core::keymap::{parse_chord, Action, Platform};
use tutorchat_core::rewards::RewardKind;
use tutorchat_core::search::SearchFilter;
use tutorchat_core::testing::{
    FakeMicrophone, FakePreviewResolver, FakeSpeechToText, MemoryArtifactSink,
    RecordingRewardSink, RecordingUploadObserver,
};
use tutorchat_core::voice::VoiceState;
use tutorchat_core::{
    Attachment, ChatEngine, ConnectionState, ContentKind, Delivery, EngineConfig, InboundEvent,
    Notice, Reaction, SendRejected, Sender,
};
use tutorchat_transport::backends::mock::MockTransport;
use tutorchat_transport::ReconnectPolicy;

struct Harness {
    mock: MockTransport,
    history: Arc<MemoryKeyValueStore>,
    rewards: RecordingRewardSink,
    artifacts: MemoryArtifactSink,
}

impl Harness {
    fn new(mock: MockTransport) -> Self {
        Self {
            mock,
            history: Arc::new(MemoryKeyValueStore::new()),
            rewards: RecordingRewardSink::default(),
            artifacts: MemoryArtifactSink::default(),
        }
    }

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.transport.transport_type = "mock".to_string();
        config.transport.reconnect = ReconnectPolicy::disabled();
        config
    }

    fn engine(&self) -> ChatEngine {
        self.engine_with(Self::config(), Capabilities::headless())
    }

    fn engine_with(&self, config: EngineConfig, capabilities: Capabilities) -> ChatEngine {
        ChatEngine::builder(config)
            .transport(Arc::new(self.mock.clone()))
            .history(self.history.clone())
            .rewards(Arc::new(self.rewards.clone()))
            .artifacts(Arc::new(self.artifacts.clone()))
            .capabilities(capabilities)
            .platform(Platform::Other)
            .build()
            .unwrap()
    }
}

fn reply(content: &str) -> InboundEvent {
    InboundEvent::message("python-tutor", content, ContentKind::Text)
}

fn attachment(id: &str) -> Attachment {
    Attachment {
        id: id.to_string(),
        filename: "worksheet.pdf".to_string(),
        mime_type: "application/pdf".to_string(),
        size: 2048,
        url: "https://files.example/worksheet.pdf".to_string(),
        thumbnail_url: None,
    }
}

// =============================================================================
// Outbound send
// =============================================================================

#[tokio::test]
async fn test_send_is_echoed_acked_and_answered() {
    let harness = Harness::new(MockTransport::new().on_send("loops").respond_text("Use a for loop."));
    let mut engine = harness.engine();
    assert_eq!(
        engine.mount("python-tutor", Some("s-1".to_string())).await,
        ConnectionState::Connected
    );

    let id = engine.send_message("How do loops work?", ContentKind::Text).unwrap();
    let echo = engine.store().get(&id).unwrap();
    assert_eq!(echo.sender, Sender::LocalUser);
    assert_eq!(echo.delivery, Delivery::Pending);
    assert!(engine.is_loading());
    assert!(engine.is_typing());

    engine.run_until_idle().await;

    let messages = engine.store().all();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].id, id);
    assert_eq!(messages[1].delivery, Delivery::Sent);
    assert_eq!(messages[2].content, "Use a for loop.");
    assert_eq!(messages[2].sender, Sender::RemoteAgent);
    assert!(!engine.is_loading());
    assert!(!engine.is_typing());

    let sent = harness.mock.sent();
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        tutorchat_transport::OutboundEvent::Message { data, .. } => {
            assert_eq!(data.session_id, "s-1");
            assert_eq!(data.message_id.as_deref(), Some(id.as_str()));
        }
    }

    let awarded = harness.rewards.wait_for(2).await;
    let kinds: Vec<RewardKind> = awarded.iter().map(|r| r.kind).collect();
    assert!(kinds.contains(&RewardKind::Send));
    let interaction = awarded
        .iter()
        .find(|r| r.kind == RewardKind::Interaction)
        .unwrap();
    // Round trip time from send to reply
    assert!(interaction.elapsed_ms.is_some_and(|ms| ms < 60_000));
}

#[tokio::test]
async fn test_send_failure_adds_apology_and_keeps_connection() {
    let harness = Harness::new(MockTransport::new());
    let mut engine = harness.engine();
    engine.mount("python-tutor", None).await;
    harness.mock.set_fail_sends(true);

    let before = engine.store().len();
    let id = engine.send_message("hello?", ContentKind::Text).unwrap();
    engine.run_until_idle().await;

    assert_eq!(engine.store().len(), before + 2);
    assert_eq!(engine.store().get(&id).unwrap().delivery, Delivery::Failed);
    let apology = engine.store().last().unwrap();
    assert_eq!(apology.sender, Sender::RemoteAgent);
    assert!(apology.content.starts_with("Sorry"));

    assert!(!engine.is_loading());
    assert!(!engine.is_typing());
    assert_eq!(engine.connection_state(), ConnectionState::Connected);
    assert!(engine
        .drain_notices()
        .iter()
        .any(|n| matches!(n, Notice::SendFailed { .. })));
}

#[tokio::test]
async fn test_send_preconditions() {
    let harness = Harness::new(MockTransport::new().on_send("first").respond_nothing());
    let mut engine = harness.engine();
    engine.mount("python-tutor", None).await;
    let before = engine.store().len();

    assert_eq!(
        engine.send_message("   \n", ContentKind::Text),
        Err(SendRejected::EmptyContent)
    );

    engine.send_message("first", ContentKind::Text).unwrap();
    assert_eq!(
        engine.send_message("second", ContentKind::Text),
        Err(SendRejected::Busy)
    );
    assert_eq!(engine.store().len(), before + 1);

    engine.run_until_idle().await;
    assert!(engine.send_message("second", ContentKind::Text).is_ok());
}

#[tokio::test]
async fn test_failed_connect_rejects_sends() {
    let harness = Harness::new(MockTransport::new().fail_next_opens(1));
    let mut engine = harness.engine();

    assert_eq!(
        engine.mount("python-tutor", None).await,
        ConnectionState::Disconnected
    );
    assert!(engine
        .drain_notices()
        .iter()
        .any(|n| matches!(n, Notice::ConnectionFailed { .. })));
    assert_eq!(
        engine.send_message("hello", ContentKind::Text),
        Err(SendRejected::NotConnected)
    );
    assert_eq!(engine.store().len(), 1);
}

#[tokio::test]
async fn test_composer_code_message_carries_language() {
    let harness = Harness::new(MockTransport::new().on_send("print").respond_nothing());
    let mut engine = harness.engine();
    engine.mount("python-tutor", None).await;

    engine.perform(Action::ToggleCodeEditor).unwrap();
    engine.composer_mut().set_draft("print('hi')");
    let id = engine.submit_composer().unwrap();
    assert_eq!(engine.composer().draft(), "");

    let message = engine.store().get(&id).unwrap();
    assert_eq!(message.kind, ContentKind::Code);
    assert_eq!(message.code_language(), Some("python"));
}

// =============================================================================
// Inbound events
// =============================================================================

#[tokio::test]
async fn test_duplicate_inbound_message_is_ignored() {
    let harness = Harness::new(MockTransport::new());
    let mut engine = harness.engine();
    engine.mount("python-tutor", None).await;

    let event = reply("Welcome back!").with_id("m-1");
    harness.mock.inject(event.clone()).await.unwrap();
    harness.mock.inject(event).await.unwrap();
    engine.run_until_idle().await;

    assert_eq!(engine.store().len(), 2);
    assert_eq!(engine.unread_count(), 2);
    let interactions = harness
        .rewards
        .awarded()
        .into_iter()
        .filter(|r| r.kind == RewardKind::Interaction)
        .count();
    assert_eq!(interactions, 1);
}

#[tokio::test]
async fn test_reaction_replay_is_idempotent() {
    let harness = Harness::new(MockTransport::new());
    let mut engine = harness.engine();
    engine.mount("python-tutor", None).await;

    harness.mock.inject(reply("Great question").with_id("m-1")).await.unwrap();
    engine.run_until_idle().await;

    let reactions = vec![Reaction {
        emoji: "👍".to_string(),
        user_id: "student-1".to_string(),
        count: 2,
    }];
    harness
        .mock
        .inject(InboundEvent::reaction("python-tutor", "m-1", reactions.clone()))
        .await
        .unwrap();
    engine.run_until_idle().await;
    let once = engine.store().all();
    let revision = engine.store().revision();

    harness
        .mock
        .inject(InboundEvent::reaction("python-tutor", "m-1", reactions.clone()))
        .await
        .unwrap();
    harness
        .mock
        .inject(InboundEvent::reaction("python-tutor", "evicted", reactions.clone()))
        .await
        .unwrap();
    engine.run_until_idle().await;

    assert_eq!(engine.store().all(), once);
    assert_eq!(engine.store().revision(), revision);
    assert_eq!(engine.store().get("m-1").unwrap().reactions, reactions);
    assert!(engine.drain_notices().is_empty());
}

#[tokio::test]
async fn test_file_share_becomes_file_message() {
    let harness = Harness::new(MockTransport::new());
    let mut engine = harness.engine();
    engine.mount("python-tutor", None).await;

    let event = InboundEvent::file_shared("python-tutor", attachment("att-9"));
    harness.mock.inject(event.clone()).await.unwrap();
    harness.mock.inject(event).await.unwrap();
    engine.run_until_idle().await;

    assert_eq!(engine.store().len(), 2);
    let file = engine.store().get("file-att-9").unwrap();
    assert_eq!(file.kind, ContentKind::File);
    assert_eq!(file.content, "worksheet.pdf");
    assert_eq!(file.attachments.len(), 1);

    let receives = harness.rewards.wait_for(1).await;
    assert_eq!(receives[0].kind, RewardKind::Receive);
    assert_eq!(receives[0].message_length, 2048);
    assert_eq!(receives[0].elapsed_ms, None);
}

#[tokio::test]
async fn test_capacity_and_ordering() {
    let harness = Harness::new(MockTransport::new());
    let mut config = Harness::config();
    config.history.max_messages = 5;
    let mut engine = harness.engine_with(config, Capabilities::headless());
    engine.mount("python-tutor", None).await;

    for i in 0..12 {
        let mut event = reply(&format!("reply {}", i));
        if i == 7 {
            // Arrives stamped far in the past
            event.timestamp = 1_000;
        }
        harness.mock.inject(event).await.unwrap();
    }
    engine.run_until_idle().await;

    let messages = engine.store().all();
    assert_eq!(messages.len(), 5);
    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["reply 7", "reply 8", "reply 9", "reply 10", "reply 11"]
    );
    assert!(messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

// =============================================================================
// Search
// =============================================================================

#[tokio::test]
async fn test_search_view_and_close() {
    let harness = Harness::new(MockTransport::new());
    let mut engine = harness.engine();
    engine.mount("python-tutor", None).await;

    harness.mock.inject(reply("The ABC of recursion")).await.unwrap();
    harness
        .mock
        .inject(InboundEvent::message("python-tutor", "abc = [1, 2]", ContentKind::Code))
        .await
        .unwrap();
    harness.mock.inject(reply("unrelated")).await.unwrap();
    engine.run_until_idle().await;

    engine.set_search_filter(SearchFilter::new("abc").with_kinds(&[ContentKind::Text]));
    let found: Vec<String> = engine
        .visible_messages()
        .iter()
        .map(|m| m.content.clone())
        .collect();
    assert_eq!(found, vec!["The ABC of recursion".to_string()]);

    engine.set_search_query("");
    assert!(engine.visible_messages().is_empty());

    engine.perform(Action::Escape).unwrap();
    assert_eq!(engine.visible_messages().len(), 4);
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_history_round_trip_is_truncated() {
    let harness = Harness::new(MockTransport::new());
    let mut engine = harness.engine();
    engine.mount("python-tutor", Some("s-keep".to_string())).await;
    for i in 0..60 {
        harness.mock.inject(reply(&format!("note {}", i))).await.unwrap();
    }
    engine.run_until_idle().await;
    engine.unmount(false).await;

    let mut reloaded = harness.engine();
    reloaded.mount("python-tutor", Some("s-keep".to_string())).await;
    let messages = reloaded.store().all();
    assert_eq!(messages.len(), 50);
    assert_eq!(messages.first().unwrap().content, "note 10");
    assert_eq!(messages.last().unwrap().content, "note 59");
}

#[tokio::test]
async fn test_corrupt_history_falls_back_to_welcome() {
    let harness = Harness::new(MockTransport::new());
    harness
        .history
        .set(&history_key("s-bad"), b"{not json")
        .unwrap();

    let mut engine = harness.engine();
    let state = engine.mount("python-tutor", Some("s-bad".to_string())).await;
    assert_eq!(state, ConnectionState::Connected);
    assert_eq!(engine.store().len(), 1);
    assert!(engine
        .drain_notices()
        .iter()
        .any(|n| matches!(n, Notice::PersistenceFailed { .. })));
}

#[tokio::test]
async fn test_ending_session_removes_history() {
    let harness = Harness::new(MockTransport::new());
    let mut engine = harness.engine();
    engine.mount("python-tutor", Some("s-end".to_string())).await;
    harness.mock.inject(reply("bye")).await.unwrap();
    engine.run_until_idle().await;
    assert!(harness.history.get(&history_key("s-end")).unwrap().is_some());

    engine.unmount(true).await;
    assert!(harness.history.get(&history_key("s-end")).unwrap().is_none());
    assert!(engine.session().is_none());
    assert!(!harness.mock.is_open());
}

#[tokio::test]
async fn test_unacked_send_is_failed_after_remount() {
    let harness = Harness::new(MockTransport::new());
    let mut engine = harness.engine();
    engine.mount("python-tutor", Some("s-orphan".to_string())).await;
    let id = engine.send_message("are you there?", ContentKind::Text).unwrap();
    // Leave before the ack is processed
    engine.unmount(false).await;

    engine.mount("python-tutor", Some("s-orphan".to_string())).await;
    let restored = engine.store().get(&id).unwrap();
    assert_eq!(restored.sender, Sender::LocalUser);
    assert_eq!(restored.delivery, Delivery::Failed);
    assert!(!restored.is_in_flight());
    assert!(!engine.store().iter().any(|m| m.is_in_flight()));

    // The restored session accepts a fresh send
    engine.run_until_idle().await;
    assert!(engine.send_message("hello again", ContentKind::Text).is_ok());
}

// =============================================================================
// Voice and attachments
// =============================================================================

#[tokio::test]
async fn test_voice_transcript_lands_in_composer() {
    let harness = Harness::new(MockTransport::new());
    let mic = FakeMicrophone::with_chunks(vec![vec![1, 2, 3]]);
    let capabilities = Capabilities::headless()
        .with_audio(Arc::new(mic.clone()))
        .with_speech_to_text(Arc::new(FakeSpeechToText::returning("what is a closure")));
    let mut engine = harness.engine_with(Harness::config(), capabilities);
    engine.mount("python-tutor", None).await;

    assert_eq!(engine.toggle_voice(), VoiceState::RequestingPermission);
    engine.run_until_idle().await;
    assert_eq!(engine.voice_state(), VoiceState::Recording);

    assert_eq!(engine.toggle_voice(), VoiceState::Processing);
    engine.run_until_idle().await;
    assert_eq!(engine.voice_state(), VoiceState::Idle);
    assert_eq!(engine.composer().draft(), "what is a closure");
    assert!(!mic.is_active());
}

#[tokio::test]
async fn test_denied_microphone_raises_notice() {
    let harness = Harness::new(MockTransport::new());
    let capabilities = Capabilities::headless().with_audio(Arc::new(FakeMicrophone::denied()));
    let mut engine = harness.engine_with(Harness::config(), capabilities);
    engine.mount("python-tutor", None).await;

    engine.toggle_voice();
    engine.run_until_idle().await;
    assert_eq!(engine.voice_state(), VoiceState::Idle);
    assert!(engine
        .drain_notices()
        .iter()
        .any(|n| matches!(n, Notice::PermissionDenied { .. })));
}

#[tokio::test]
async fn test_unmount_while_recording_releases_microphone() {
    let harness = Harness::new(MockTransport::new());
    let mic = FakeMicrophone::with_chunks(vec![vec![1]]);
    let capabilities = Capabilities::headless().with_audio(Arc::new(mic.clone()));
    let mut engine = harness.engine_with(Harness::config(), capabilities);
    engine.mount("python-tutor", None).await;

    engine.toggle_voice();
    engine.run_until_idle().await;
    assert!(mic.is_active());

    engine.unmount(false).await;
    assert!(!mic.is_active());
    assert_eq!(engine.voice_state(), VoiceState::Idle);

    let before = engine.store().all();
    engine.run_until_idle().await;
    assert_eq!(engine.store().all(), before);
    assert_eq!(engine.voice_state(), VoiceState::Idle);
}

#[tokio::test]
async fn test_pending_attachments_ride_along_with_send() {
    let harness = Harness::new(MockTransport::new().on_send("see attached").respond_nothing());
    let uploads = RecordingUploadObserver::default();
    let capabilities = Capabilities::headless()
        .with_previews(Arc::new(FakePreviewResolver::default()))
        .with_uploads(Arc::new(uploads.clone()));
    let mut engine = harness.engine_with(Harness::config(), capabilities);
    engine.mount("python-tutor", None).await;

    engine.drag_over();
    assert!(engine.attachments().is_drag_active());
    engine.drop_files(vec![LocalFile::new("/tmp/lesson/diagram.png", 512)]);
    engine.run_until_idle().await;
    assert_eq!(engine.attachments().pending().len(), 1);

    let uploaded = uploads.uploaded();
    assert_eq!(uploaded.len(), 1);
    assert_eq!(uploaded[0].path, std::path::PathBuf::from("/tmp/lesson/diagram.png"));
    assert_eq!(uploaded[0].session_id, engine.session().unwrap().id);
    assert_eq!(uploaded[0].attachment_id, engine.attachments().pending()[0].id);

    let id = engine.send_message("see attached", ContentKind::Text).unwrap();
    assert!(engine.attachments().pending().is_empty());
    let message = engine.store().get(&id).unwrap();
    assert_eq!(message.attachments[0].mime_type, "image/png");

    engine.run_until_idle().await;
    match &harness.mock.sent()[0] {
        tutorchat_transport::OutboundEvent::Message { data, .. } => {
            assert_eq!(data.attachments.len(), 1)
        }
    }
}

// =============================================================================
// Commands, export and clipboard
// =============================================================================

#[tokio::test]
async fn test_export_chord_delivers_artifact() {
    let harness = Harness::new(MockTransport::new());
    let mut engine = harness.engine();
    engine.mount("python-tutor", Some("s-exp".to_string())).await;

    let chord = parse_chord("Ctrl+E", Platform::Other).unwrap();
    assert_eq!(engine.handle_key(&chord), Some(Action::Export));
    engine.run_until_idle().await;

    let artifacts = harness.artifacts.artifacts();
    assert_eq!(artifacts.len(), 1);
    let (name, document) = &artifacts[0];
    assert!(name.starts_with("chat-python-tutor-"));
    assert!(name.ends_with(".json"));
    assert_eq!(document.session_id, "s-exp");
    assert_eq!(document.message_count, 1);
    assert_eq!(engine.last_export(), Some(format!("memory://{}", name).as_str()));
}

#[tokio::test]
async fn test_copy_message_to_clipboard() {
    let harness = Harness::new(MockTransport::new());
    let clipboard = Arc::new(MemoryClipboard::new());
    let capabilities = Capabilities::headless().with_clipboard(clipboard.clone());
    let mut engine = harness.engine_with(Harness::config(), capabilities);
    engine.mount("python-tutor", None).await;

    harness.mock.inject(reply("copy me").with_id("m-copy")).await.unwrap();
    engine.run_until_idle().await;

    assert!(engine.copy_message("m-copy"));
    assert_eq!(clipboard.contents().as_deref(), Some("copy me"));
    assert!(!engine.copy_message("missing"));
}

#[tokio::test]
async fn test_dropped_channel_raises_notice() {
    let harness = Harness::new(MockTransport::new());
    let mut engine = harness.engine();
    engine.mount("python-tutor", None).await;
    engine.run_until_idle().await;
    engine.drain_notices();

    harness.mock.drop_connection("server restart").await;
    engine.run_until_idle().await;

    assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
    assert!(engine
        .drain_notices()
        .iter()
        .any(|n| matches!(n, Notice::ConnectionFailed { .. })));
}
