// ABOUTME: ChatEngine owns one chat session: store, durability, pipelines, search and keymap.
// ABOUTME: Every async source posts into one mailbox; step() applies events one at a time.

use crate::attachments::{AttachmentEvent, AttachmentPipeline};
use crate::capabilities::{Capabilities, ClipboardWriter, LocalFile};
use crate::composer::{ComposedMessage, Composer};
use crate::config::EngineConfig;
use crate::durability::{HistoryPersistence, KeyValueStore, SqliteKeyValueStore};
use crate::export::{ArtifactSink, DirectorySink, ExportDocument};
use crate::keymap::{Action, KeyChord, Keymap, Platform};
use crate::message::{ChatMessage, ContentKind, Delivery, MessageMetadata, MessagePatch};
use crate::notice::{Notice, SendRejected};
use crate::rewards::{self, LoggingRewardSink, RewardEvent, RewardKind, RewardSink};
use crate::search::{SearchFilter, SearchIndex};
use crate::session::{AgentDirectory, Session, StaticAgentDirectory};
use crate::store::{AppendOutcome, MessageStore};
use crate::voice::{VoiceEvent, VoiceInputCallback, VoicePipeline, VoiceState, VoiceUpdate};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tutorchat_transport::event::{EventPayload, FileSharedPayload, MessagePayload};
use tutorchat_transport::{
    ChannelAddress, ConnectionState, EventKind, InboundEvent, OutboundEvent, OutboundMessage,
    Transport, TransportConnector, TransportRegistry,
};

/// Quiet period after which `run_until_idle` considers the mailbox settled
const IDLE_GRACE: Duration = Duration::from_millis(50);

const SEND_APOLOGY: &str =
    "Sorry, I couldn't deliver your message. Please check your connection and try again.";

/// Everything that can arrive in the engine mailbox
#[derive(Debug)]
pub enum EngineEvent {
    Inbound {
        generation: u64,
        event: InboundEvent,
    },
    SendCompleted {
        generation: u64,
        message_id: String,
        length: usize,
        result: Result<(), String>,
    },
    ConnectionChanged {
        generation: u64,
        state: ConnectionState,
    },
    Exported {
        generation: u64,
        name: String,
        result: Result<String, String>,
    },
    Voice(VoiceEvent),
    Attachment(AttachmentEvent),
}

pub struct EngineBuilder {
    config: EngineConfig,
    transport: Option<Arc<dyn Transport>>,
    capabilities: Capabilities,
    rewards: Arc<dyn RewardSink>,
    artifacts: Option<Arc<dyn ArtifactSink>>,
    history: Option<Arc<dyn KeyValueStore>>,
    directory: Option<Arc<dyn AgentDirectory>>,
    platform: Platform,
    on_voice_input: Option<VoiceInputCallback>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            transport: None,
            capabilities: Capabilities::headless(),
            rewards: Arc::new(LoggingRewardSink),
            artifacts: None,
            history: None,
            directory: None,
            platform: Platform::current(),
            on_voice_input: None,
        }
    }

    /// Use this transport instead of creating one from `[transport]`
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn rewards(mut self, rewards: Arc<dyn RewardSink>) -> Self {
        self.rewards = rewards;
        self
    }

    pub fn artifacts(mut self, artifacts: Arc<dyn ArtifactSink>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Key-value store for history; defaults to SQLite at the configured path
    pub fn history(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.history = Some(store);
        self
    }

    pub fn directory(mut self, directory: Arc<dyn AgentDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn on_voice_input(mut self, callback: VoiceInputCallback) -> Self {
        self.on_voice_input = Some(callback);
        self
    }

    pub fn build(self) -> Result<ChatEngine> {
        let config = self.config;
        let transport = match self.transport {
            Some(transport) => transport,
            None => TransportRegistry::default().create(&config.transport)?,
        };
        let history: Arc<dyn KeyValueStore> = match self.history {
            Some(store) => store,
            None => Arc::new(
                SqliteKeyValueStore::open(&config.database_path())
                    .context("Failed to open history database")?,
            ),
        };
        let artifacts: Arc<dyn ArtifactSink> = match self.artifacts {
            Some(sink) => sink,
            None => Arc::new(DirectorySink::new(config.export_dir())),
        };
        let directory: Arc<dyn AgentDirectory> = match self.directory {
            Some(directory) => directory,
            None => Arc::new(StaticAgentDirectory::from_profiles(config.agents.clone())),
        };
        let keymap = Keymap::with_overrides(self.platform, &config.keybindings)
            .context("Invalid [keybindings]")?;

        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        let capabilities = self.capabilities;

        let voice_tx = mailbox_tx.clone();
        let mut voice = VoicePipeline::new(
            config.voice.clone(),
            Arc::clone(&capabilities.audio),
            Arc::clone(&capabilities.speech_to_text),
            Arc::clone(&capabilities.synthesizer),
            Arc::new(move |event| {
                let _ = voice_tx.send(EngineEvent::Voice(event));
            }),
        );
        voice.set_on_voice_input(self.on_voice_input);

        let attachment_tx = mailbox_tx.clone();
        let attachments = AttachmentPipeline::new(
            Arc::clone(&capabilities.previews),
            Arc::clone(&capabilities.uploads),
            Arc::new(move |event| {
                let _ = attachment_tx.send(EngineEvent::Attachment(event));
            }),
        );

        let connector = TransportConnector::new(transport, config.transport.connector_config());
        tracing::info!(
            transport = connector.transport_name(),
            max_messages = config.history.max_messages,
            "Chat engine ready"
        );

        Ok(ChatEngine {
            store: MessageStore::new(config.history.max_messages),
            persistence: HistoryPersistence::new(history, config.history.restore_window),
            composer: Composer::new(config.chat.code_language.clone()),
            config,
            connector,
            directory,
            rewards: self.rewards,
            artifacts,
            clipboard: Arc::clone(&capabilities.clipboard),
            search: SearchIndex::new(),
            voice,
            attachments,
            keymap,
            session: None,
            typing: BTreeSet::new(),
            presence: None,
            observed_state: ConnectionState::Disconnected,
            is_loading: false,
            last_send_at: None,
            last_export: None,
            notices: VecDeque::new(),
            mailbox_tx,
            mailbox_rx,
            generation: 0,
            cancel: CancellationToken::new(),
        })
    }
}

/// Single-owner chat session engine.
///
/// Connector handlers, send completions, voice and file results all land in
/// one mailbox. Nothing mutates the store except `apply` and the synchronous
/// user operations, so the log has one writer.
pub struct ChatEngine {
    config: EngineConfig,
    connector: TransportConnector,
    directory: Arc<dyn AgentDirectory>,
    persistence: HistoryPersistence,
    rewards: Arc<dyn RewardSink>,
    artifacts: Arc<dyn ArtifactSink>,
    clipboard: Arc<dyn ClipboardWriter>,
    store: MessageStore,
    search: SearchIndex,
    composer: Composer,
    voice: VoicePipeline,
    attachments: AttachmentPipeline,
    keymap: Keymap,
    session: Option<Session>,
    /// Senders currently shown as typing
    typing: BTreeSet<String>,
    presence: Option<String>,
    /// Last connection state seen through the watcher
    observed_state: ConnectionState,
    is_loading: bool,
    last_send_at: Option<Instant>,
    last_export: Option<String>,
    notices: VecDeque<Notice>,
    mailbox_tx: mpsc::UnboundedSender<EngineEvent>,
    mailbox_rx: mpsc::UnboundedReceiver<EngineEvent>,
    /// Bumped on every mount and unmount; older events are stale
    generation: u64,
    cancel: CancellationToken,
}

impl ChatEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open a session with an agent: restore history (or greet), subscribe
    /// to the channel and connect. A failed connect leaves the session
    /// mounted and raises a ConnectionFailed notice.
    pub async fn mount(&mut self, agent_id: &str, session_id: Option<String>) -> ConnectionState {
        if self.session.is_some() {
            self.unmount(false).await;
        }

        self.generation += 1;
        self.cancel = CancellationToken::new();
        self.voice.activate();

        let agent = self.directory.resolve(agent_id);
        let mut session = Session::new(agent, session_id);
        if let Some(user) = &self.config.chat.user_id {
            session = session.with_user(user.clone());
        }

        let welcome = ChatMessage::remote(session.agent.welcome_text(), ContentKind::Text);
        let loaded = self.persistence.load_or_welcome(&session.id, welcome);
        if let Some(e) = loaded.error {
            self.notify(Notice::PersistenceFailed {
                reason: format!("{:#}", e),
            });
        }
        self.store.restore(loaded.messages);
        self.reset_view();

        tracing::info!(
            session_id = %session.id,
            agent_id = %session.agent.id,
            restored = loaded.restored,
            messages = self.store.len(),
            "Session mounted"
        );

        let context = session.context();
        self.attachments.activate(context.clone());
        self.session = Some(session);
        self.subscribe_handlers();
        self.watch_connection();

        let address = match ChannelAddress::for_session(&self.config.transport.url, &context) {
            Ok(address) => address,
            Err(e) => {
                self.notify(Notice::ConnectionFailed {
                    reason: format!("{:#}", e),
                });
                return ConnectionState::Disconnected;
            }
        };

        let state = self.connector.connect(&address, &context).await;
        if state != ConnectionState::Connected {
            self.notify(Notice::ConnectionFailed {
                reason: format!("Could not reach {}", address.as_str()),
            });
        }
        state
    }

    /// Tear the session down. Handlers are removed, capture stops, pending
    /// work is abandoned and late results are discarded. With `end_session`
    /// the stored history is deleted too.
    pub async fn unmount(&mut self, end_session: bool) {
        self.cancel.cancel();
        self.generation += 1;
        self.connector.disconnect().await;
        self.voice.shutdown();
        self.attachments.shutdown();

        if let Some(session) = self.session.take() {
            if end_session {
                if let Err(e) = self.persistence.clear(&session.id) {
                    tracing::warn!(session_id = %session.id, error = %e, "Failed to clear history");
                }
            } else if let Err(e) = self.persistence.save(&session.id, &self.store) {
                tracing::warn!(session_id = %session.id, error = %e, "Failed to save history on unmount");
            }
            tracing::info!(session_id = %session.id, end_session, "Session unmounted");
        }

        while self.mailbox_rx.try_recv().is_ok() {}
        self.reset_view();
    }

    fn reset_view(&mut self) {
        self.typing.clear();
        self.presence = None;
        self.observed_state = ConnectionState::Disconnected;
        self.is_loading = false;
        self.last_send_at = None;
        self.search.close();
    }

    fn subscribe_handlers(&self) {
        let kinds = [
            EventKind::Message,
            EventKind::Typing,
            EventKind::Status,
            EventKind::Reaction,
            EventKind::FileShared,
        ];
        for kind in kinds {
            let tx = self.mailbox_tx.clone();
            let generation = self.generation;
            self.connector.subscribe(
                kind,
                Arc::new(move |event: &InboundEvent| {
                    let _ = tx.send(EngineEvent::Inbound {
                        generation,
                        event: event.clone(),
                    });
                }),
            );
        }
    }

    fn watch_connection(&self) {
        let mut states = self.connector.watch_state();
        let tx = self.mailbox_tx.clone();
        let generation = self.generation;
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *states.borrow_and_update();
                        if tx.send(EngineEvent::ConnectionChanged { generation, state }).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Wait for the next mailbox event without applying it
    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        self.mailbox_rx.recv().await
    }

    /// Wait for one event and apply it
    pub async fn step(&mut self) -> bool {
        match self.mailbox_rx.recv().await {
            Some(event) => {
                self.apply(event);
                true
            }
            None => false,
        }
    }

    /// Apply events until the mailbox stays quiet for a short grace period.
    /// Returns how many were applied.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(Some(event)) = tokio::time::timeout(IDLE_GRACE, self.mailbox_rx.recv()).await
        {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    pub fn apply(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Inbound { generation, event } => {
                if self.is_current(generation) {
                    self.handle_inbound(event);
                }
            }
            EngineEvent::SendCompleted {
                generation,
                message_id,
                length,
                result,
            } => {
                if self.is_current(generation) {
                    self.handle_send_completed(message_id, length, result);
                }
            }
            EngineEvent::ConnectionChanged { generation, state } => {
                if self.is_current(generation) {
                    self.handle_connection_changed(state);
                }
            }
            EngineEvent::Exported {
                generation,
                name,
                result,
            } => {
                if generation == self.generation {
                    self.handle_exported(name, result);
                }
            }
            EngineEvent::Voice(event) => {
                match self.voice.handle(event) {
                    Some(VoiceUpdate::Transcript(text)) if !text.is_empty() => {
                        self.composer.set_draft(text);
                    }
                    Some(VoiceUpdate::Failed(notice)) => self.notify(notice),
                    _ => {}
                }
            }
            EngineEvent::Attachment(event) => {
                if let Some(notice) = self.attachments.handle(event) {
                    self.notify(notice);
                }
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let current = generation == self.generation && self.session.is_some();
        if !current {
            tracing::debug!(generation, current = self.generation, "Discarding stale event");
        }
        current
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    fn handle_inbound(&mut self, event: InboundEvent) {
        let sender = event.agent_id;
        let timestamp = timestamp_from_millis(event.timestamp);
        match event.payload {
            EventPayload::Message(payload) => self.receive_message(&sender, timestamp, payload),
            EventPayload::FileShared(payload) => self.receive_file(&sender, timestamp, payload),
            EventPayload::Reaction(payload) => {
                if !self.store.set_reactions(&payload.message_id, payload.reactions) {
                    tracing::debug!(message_id = %payload.message_id, "Reaction for unknown or unchanged message");
                    return;
                }
                self.persist();
            }
            EventPayload::Typing(payload) => {
                let who = payload.user_id.unwrap_or(sender);
                if payload.is_typing {
                    self.typing.insert(who);
                } else {
                    self.typing.remove(&who);
                }
            }
            EventPayload::Status(payload) => {
                tracing::debug!(agent_id = %sender, status = %payload.status, "Agent status");
                self.presence = Some(payload.status);
            }
        }
    }

    fn receive_message(&mut self, sender: &str, timestamp: DateTime<Utc>, payload: MessagePayload) {
        let mut message = ChatMessage::remote(payload.content, payload.kind)
            .with_timestamp(timestamp)
            .with_attachments(payload.attachments)
            .with_metadata(payload.metadata);
        if let Some(id) = payload.id {
            message = message.with_id(id);
        }
        let length = message.content.chars().count();
        let speakable = matches!(message.kind, ContentKind::Text | ContentKind::Markdown)
            .then(|| message.content.clone());

        let outcome = self.store.append(message);
        if let AppendOutcome::Duplicate(id) = &outcome {
            tracing::debug!(message_id = %id, "Duplicate inbound message ignored");
            return;
        }

        self.typing.remove(sender);
        metrics::counter!("tutorchat_messages_received_total").increment(1);
        self.persist();

        let elapsed_ms = self
            .last_send_at
            .take()
            .map(|sent| u64::try_from(sent.elapsed().as_millis()).unwrap_or(u64::MAX));
        self.award(RewardKind::Interaction, length, elapsed_ms);

        if let Some(text) = speakable {
            self.voice.speak(&text);
        }
    }

    fn receive_file(&mut self, sender: &str, timestamp: DateTime<Utc>, payload: FileSharedPayload) {
        let id = payload
            .id
            .unwrap_or_else(|| format!("file-{}", payload.attachment.id));
        let content = payload
            .content
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| payload.attachment.filename.clone());
        let size = payload.attachment.size;
        let message = ChatMessage::remote(content, ContentKind::File)
            .with_id(id)
            .with_timestamp(timestamp)
            .with_attachments(vec![payload.attachment]);

        if !self.store.append(message).is_appended() {
            tracing::debug!("Duplicate file share ignored");
            return;
        }
        self.typing.remove(sender);
        metrics::counter!("tutorchat_messages_received_total").increment(1);
        self.persist();
        self.award(RewardKind::Receive, usize::try_from(size).unwrap_or(usize::MAX), None);
    }

    fn handle_connection_changed(&mut self, state: ConnectionState) {
        let previous = std::mem::replace(&mut self.observed_state, state);
        tracing::debug!(from = %previous, to = %state, "Connection state observed");
        match state {
            ConnectionState::Degraded => self.notify(Notice::ConnectionFailed {
                reason: "Connection lost, reconnecting".to_string(),
            }),
            ConnectionState::Disconnected
                if matches!(previous, ConnectionState::Connected | ConnectionState::Degraded) =>
            {
                // No reply is coming on a dead channel
                self.typing.clear();
                self.notify(Notice::ConnectionFailed {
                    reason: "Connection lost".to_string(),
                });
            }
            _ => {}
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Send `content` as a local message.
    ///
    /// Returns the local message id once it is in the log. Completion
    /// arrives later through the mailbox.
    pub fn send_message(&mut self, content: &str, kind: ContentKind) -> Result<String, SendRejected> {
        let code_language =
            (kind == ContentKind::Code).then(|| self.composer.code_language().to_string());
        self.send_composed(ComposedMessage {
            content: content.to_string(),
            kind,
            code_language,
        })
    }

    /// Send whatever the composer holds
    pub fn submit_composer(&mut self) -> Result<String, SendRejected> {
        let composed = self.composer.compose().ok_or(SendRejected::EmptyContent)?;
        self.send_composed(composed)
    }

    fn send_composed(&mut self, composed: ComposedMessage) -> Result<String, SendRejected> {
        if composed.content.trim().is_empty() {
            return Err(SendRejected::EmptyContent);
        }
        let Some(session) = &self.session else {
            return Err(SendRejected::NoSession);
        };
        if !self.connector.state().can_send() {
            return Err(SendRejected::NotConnected);
        }
        if self.is_loading {
            return Err(SendRejected::Busy);
        }
        let session_id = session.id.clone();
        let agent_id = session.agent.id.clone();

        self.composer.clear();
        let attachments = self.attachments.take_pending();
        let metadata = composed
            .code_language
            .clone()
            .map(|language| MessageMetadata::Code { language });
        let message = ChatMessage::local(composed.content.clone(), composed.kind)
            .with_attachments(attachments.clone())
            .with_metadata(metadata);
        let message_id = self.store.append(message).id().to_string();

        self.typing.insert(agent_id);
        self.is_loading = true;
        self.last_send_at = Some(Instant::now());
        self.persist();

        let length = composed.content.chars().count();
        let event = OutboundEvent::message(OutboundMessage {
            content: composed.content,
            message_type: composed.kind,
            code_language: composed.code_language,
            session_id,
            message_id: Some(message_id.clone()),
            attachments,
        });

        let connector = self.connector.clone();
        let tx = self.mailbox_tx.clone();
        let generation = self.generation;
        let cancel = self.cancel.clone();
        let id = message_id.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = connector.send(event) => result.map_err(|e| format!("{:#}", e)),
            };
            let _ = tx.send(EngineEvent::SendCompleted {
                generation,
                message_id: id,
                length,
                result,
            });
        });

        tracing::debug!(message_id = %message_id, "Local message queued");
        Ok(message_id)
    }

    fn handle_send_completed(&mut self, message_id: String, length: usize, result: Result<(), String>) {
        self.is_loading = false;
        match result {
            Ok(()) => {
                self.store
                    .update_by_id(&message_id, MessagePatch::delivery(Delivery::Sent));
                metrics::counter!("tutorchat_messages_sent_total").increment(1);
                self.persist();
                self.award(RewardKind::Send, length, None);
            }
            Err(reason) => {
                tracing::warn!(message_id = %message_id, %reason, "Send failed");
                metrics::counter!("tutorchat_send_failures_total").increment(1);
                self.store
                    .update_by_id(&message_id, MessagePatch::delivery(Delivery::Failed));
                self.store
                    .append(ChatMessage::remote(SEND_APOLOGY, ContentKind::Text));
                self.typing.clear();
                self.last_send_at = None;
                self.persist();
                self.notify(Notice::SendFailed { reason });
            }
        }
    }

    // =========================================================================
    // Voice and attachments
    // =========================================================================

    /// Start or stop a voice recording
    pub fn toggle_voice(&mut self) -> VoiceState {
        self.voice.toggle()
    }

    pub fn toggle_voice_input(&mut self) -> bool {
        self.voice.toggle_voice_input()
    }

    pub fn toggle_voice_output(&mut self) -> bool {
        self.voice.toggle_voice_output()
    }

    pub fn set_voice(&mut self, voice: Option<String>) {
        self.voice.set_voice(voice);
    }

    pub fn voice_state(&self) -> VoiceState {
        self.voice.state()
    }

    pub fn voice(&self) -> &VoicePipeline {
        &self.voice
    }

    pub fn attach_files(&mut self, files: Vec<LocalFile>) -> usize {
        self.attachments.attach(files)
    }

    pub fn drag_over(&mut self) {
        self.attachments.drag_over();
    }

    pub fn drag_leave(&mut self) {
        self.attachments.drag_leave();
    }

    pub fn drop_files(&mut self, files: Vec<LocalFile>) -> usize {
        self.attachments.drop_files(files)
    }

    pub fn remove_pending_attachment(&mut self, id: &str) -> bool {
        self.attachments.remove_pending(id)
    }

    pub fn clear_pending_attachments(&mut self) {
        self.attachments.clear_pending();
    }

    pub fn attachments(&self) -> &AttachmentPipeline {
        &self.attachments
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Run the action bound to `chord`, if any
    pub fn handle_key(&mut self, chord: &KeyChord) -> Option<Action> {
        let action = self.keymap.lookup(chord)?;
        if let Err(rejected) = self.perform(action) {
            tracing::debug!(action = action.as_str(), %rejected, "Action rejected");
        }
        Some(action)
    }

    pub fn perform(&mut self, action: Action) -> Result<(), SendRejected> {
        match action {
            Action::ToggleSearch => {
                if self.search.is_active() {
                    self.search.close();
                } else {
                    self.search.set_filter(SearchFilter::new(""));
                }
            }
            Action::Send => {
                self.submit_composer()?;
            }
            Action::ToggleCodeEditor => {
                self.composer.toggle_code_editor();
            }
            Action::ToggleVoice => {
                self.voice.toggle();
            }
            Action::Export => {
                self.export_session();
            }
            Action::Escape => {
                if self.search.is_active() {
                    self.search.close();
                } else if self.composer.is_code_editor_open() {
                    self.composer.toggle_code_editor();
                }
                self.attachments.drag_leave();
            }
        }
        Ok(())
    }

    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    // =========================================================================
    // Search
    // =========================================================================

    pub fn set_search_filter(&mut self, filter: SearchFilter) {
        self.search.set_filter(filter);
    }

    pub fn set_search_query(&mut self, query: &str) {
        self.search.set_query(query);
    }

    pub fn close_search(&mut self) {
        self.search.close();
    }

    pub fn is_search_active(&self) -> bool {
        self.search.is_active()
    }

    pub fn search_filter(&self) -> Option<&SearchFilter> {
        self.search.filter()
    }

    /// Search results while search is open, otherwise the whole log
    pub fn visible_messages(&mut self) -> Vec<&ChatMessage> {
        if self.search.is_active() {
            self.search.results(&self.store)
        } else {
            self.store.iter().collect()
        }
    }

    // =========================================================================
    // Export and clipboard
    // =========================================================================

    /// Snapshot the current session, or None without one
    pub fn export_document(&self) -> Option<ExportDocument> {
        let session = self.session.as_ref()?;
        Some(ExportDocument::snapshot(session, &self.store, Utc::now()))
    }

    /// Snapshot the session and hand it to the artifact sink. The delivery
    /// outcome arrives through the mailbox.
    pub fn export_session(&mut self) -> Option<ExportDocument> {
        let document = self.export_document()?;
        let name = document.artifact_name();
        let artifacts = Arc::clone(&self.artifacts);
        let tx = self.mailbox_tx.clone();
        let generation = self.generation;
        let snapshot = document.clone();
        tokio::spawn(async move {
            let result = artifacts
                .deliver(&name, &snapshot)
                .await
                .map_err(|e| format!("{:#}", e));
            let _ = tx.send(EngineEvent::Exported {
                generation,
                name,
                result,
            });
        });
        Some(document)
    }

    fn handle_exported(&mut self, name: String, result: Result<String, String>) {
        match result {
            Ok(location) => {
                tracing::info!(artifact = %name, %location, "Export delivered");
                self.last_export = Some(location);
            }
            Err(reason) => self.notify(Notice::ExportFailed { reason }),
        }
    }

    /// Where the most recent export landed
    pub fn last_export(&self) -> Option<&str> {
        self.last_export.as_deref()
    }

    /// Copy a message's content to the clipboard. Unknown ids are ignored.
    pub fn copy_message(&self, id: &str) -> bool {
        let Some(message) = self.store.get(id) else {
            return false;
        };
        match self.clipboard.write_text(&message.content) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(message_id = %id, error = %e, "Clipboard write failed");
                false
            }
        }
    }

    // =========================================================================
    // State
    // =========================================================================

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn composer_mut(&mut self) -> &mut Composer {
        &mut self.composer
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connector.state()
    }

    pub fn connector(&self) -> &TransportConnector {
        &self.connector
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn is_typing(&self) -> bool {
        !self.typing.is_empty()
    }

    pub fn typing_senders(&self) -> impl Iterator<Item = &str> {
        self.typing.iter().map(String::as_str)
    }

    pub fn presence(&self) -> Option<&str> {
        self.presence.as_deref()
    }

    pub fn mark_all_read(&mut self) -> usize {
        let changed = self.store.mark_all_read();
        if changed > 0 {
            self.persist();
        }
        changed
    }

    pub fn unread_count(&self) -> usize {
        self.store.unread_count()
    }

    /// Take every queued notice, oldest first
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn notify(&mut self, notice: Notice) {
        tracing::info!(%notice, "Notice raised");
        self.notices.push_back(notice);
    }

    fn persist(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        if let Err(e) = self.persistence.save(&session.id, &self.store) {
            let reason = format!("{:#}", e);
            tracing::warn!(session_id = %session.id, %reason, "History persist failed");
            self.notify(Notice::PersistenceFailed { reason });
        }
    }

    fn award(&self, kind: RewardKind, message_length: usize, elapsed_ms: Option<u64>) {
        let Some(session) = &self.session else {
            return;
        };
        rewards::dispatch(
            &self.rewards,
            RewardEvent {
                kind,
                session_id: session.id.clone(),
                agent_id: session.agent.id.clone(),
                message_length,
                elapsed_ms,
            },
        );
    }
}

fn timestamp_from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}
