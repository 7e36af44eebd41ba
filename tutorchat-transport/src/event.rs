// ABOUTME: Wire event types exchanged with the remote conversational agent.
// ABOUTME: Inbound events (message, typing, status, reaction, file-shared) and the outbound message call.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Current wall-clock time as epoch milliseconds, the wire timestamp unit
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// Shared Content Types
// =============================================================================

/// What a message body contains
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Text,
    Code,
    Markdown,
    Image,
    File,
    Voice,
}

impl ContentKind {
    pub const ALL: [ContentKind; 6] = [
        ContentKind::Text,
        ContentKind::Code,
        ContentKind::Markdown,
        ContentKind::Image,
        ContentKind::File,
        ContentKind::Voice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
            Self::Markdown => "markdown",
            Self::Image => "image",
            Self::File => "file",
            Self::Voice => "voice",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("Unknown content kind: {}", s))
    }
}

/// Coarse difficulty rating attached to tutoring replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityTier {
    Basic,
    Intermediate,
    Advanced,
}

/// Per-message metadata, discriminated by what it describes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MessageMetadata {
    /// Source language of a code message
    Code { language: String },
    /// Sentiment estimate for a reply
    Sentiment { label: String, score: f32 },
    /// Difficulty of the material in a reply
    Complexity { tier: ComplexityTier },
}

/// A file carried by a message, referenced by URL rather than embedded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    /// MIME type tag (e.g. "image/png")
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Size in bytes
    pub size: u64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// Aggregated emoji reaction on a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub user_id: String,
    pub count: u32,
}

// =============================================================================
// Inbound Events
// =============================================================================

/// The five inbound event kinds a channel delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Message,
    Typing,
    Status,
    Reaction,
    FileShared,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Message,
        EventKind::Typing,
        EventKind::Status,
        EventKind::Reaction,
        EventKind::FileShared,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Typing => "typing",
            Self::Status => "status",
            Self::Reaction => "reaction",
            Self::FileShared => "file-shared",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Untyped event exactly as it travels on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    pub kind: EventKind,
    pub agent_id: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Sender-assigned id, used to suppress duplicate delivery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub is_typing: bool,
    /// Who is typing; defaults to the event's agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayload {
    pub message_id: String,
    /// Full replacement list, not a delta
    pub reactions: Vec<Reaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSharedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub attachment: Attachment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Typed payload of an inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Message(MessagePayload),
    Typing(TypingPayload),
    Status(StatusPayload),
    Reaction(ReactionPayload),
    FileShared(FileSharedPayload),
}

/// Inbound event from the remote agent, decoded into its typed payload
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub agent_id: String,
    /// Epoch milliseconds as stamped by the sender
    pub timestamp: i64,
    pub payload: EventPayload,
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::Message(_) => EventKind::Message,
            EventPayload::Typing(_) => EventKind::Typing,
            EventPayload::Status(_) => EventKind::Status,
            EventPayload::Reaction(_) => EventKind::Reaction,
            EventPayload::FileShared(_) => EventKind::FileShared,
        }
    }

    /// Decode a wire event, validating the payload against its kind
    pub fn from_wire(wire: WireEvent) -> Result<Self> {
        let kind = wire.kind;
        let payload = match kind {
            EventKind::Message => EventPayload::Message(serde_json::from_value(wire.payload)?),
            EventKind::Typing => EventPayload::Typing(serde_json::from_value(wire.payload)?),
            EventKind::Status => EventPayload::Status(serde_json::from_value(wire.payload)?),
            EventKind::Reaction => EventPayload::Reaction(serde_json::from_value(wire.payload)?),
            EventKind::FileShared => {
                EventPayload::FileShared(serde_json::from_value(wire.payload)?)
            }
        };
        let timestamp = if wire.timestamp > 0 {
            wire.timestamp
        } else {
            now_millis()
        };
        Ok(Self {
            agent_id: wire.agent_id,
            timestamp,
            payload,
        })
    }

    /// Parse a JSON text frame
    pub fn parse(text: &str) -> Result<Self> {
        let wire: WireEvent = serde_json::from_str(text).context("Malformed event frame")?;
        let kind = wire.kind;
        Self::from_wire(wire).with_context(|| format!("Invalid payload for '{}' event", kind))
    }

    pub fn to_wire(&self) -> WireEvent {
        let payload = match &self.payload {
            EventPayload::Message(p) => serde_json::to_value(p),
            EventPayload::Typing(p) => serde_json::to_value(p),
            EventPayload::Status(p) => serde_json::to_value(p),
            EventPayload::Reaction(p) => serde_json::to_value(p),
            EventPayload::FileShared(p) => serde_json::to_value(p),
        }
        .unwrap_or(Value::Null);
        WireEvent {
            kind: self.kind(),
            agent_id: self.agent_id.clone(),
            payload,
            timestamp: self.timestamp,
        }
    }

    pub fn message(agent_id: impl Into<String>, content: impl Into<String>, kind: ContentKind) -> Self {
        Self::new(
            agent_id,
            EventPayload::Message(MessagePayload {
                id: None,
                content: content.into(),
                kind,
                metadata: None,
                attachments: Vec::new(),
            }),
        )
    }

    pub fn typing(agent_id: impl Into<String>, is_typing: bool) -> Self {
        Self::new(
            agent_id,
            EventPayload::Typing(TypingPayload {
                is_typing,
                user_id: None,
            }),
        )
    }

    pub fn status(agent_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self::new(
            agent_id,
            EventPayload::Status(StatusPayload {
                status: status.into(),
            }),
        )
    }

    pub fn reaction(
        agent_id: impl Into<String>,
        message_id: impl Into<String>,
        reactions: Vec<Reaction>,
    ) -> Self {
        Self::new(
            agent_id,
            EventPayload::Reaction(ReactionPayload {
                message_id: message_id.into(),
                reactions,
            }),
        )
    }

    pub fn file_shared(agent_id: impl Into<String>, attachment: Attachment) -> Self {
        Self::new(
            agent_id,
            EventPayload::FileShared(FileSharedPayload {
                id: None,
                attachment,
                content: None,
            }),
        )
    }

    fn new(agent_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            agent_id: agent_id.into(),
            timestamp: now_millis(),
            payload,
        }
    }

    /// Attach a sender-assigned id to a message or file-shared event
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        match &mut self.payload {
            EventPayload::Message(p) => p.id = Some(id.into()),
            EventPayload::FileShared(p) => p.id = Some(id.into()),
            _ => {}
        }
        self
    }
}

// =============================================================================
// Outbound Call
// =============================================================================

/// Body of an outbound chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub content: String,
    pub message_type: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_language: Option<String>,
    pub session_id: String,
    /// Local id of the optimistic echo, so replies can be correlated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// Event sent to the remote agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundEvent {
    Message { data: OutboundMessage, timestamp: i64 },
}

impl OutboundEvent {
    pub fn message(data: OutboundMessage) -> Self {
        Self::Message {
            data,
            timestamp: now_millis(),
        }
    }

    /// Text content of the event, used for logging and mock matching
    pub fn content(&self) -> &str {
        match self {
            Self::Message { data, .. } => &data.content,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize outbound event")
    }
}
