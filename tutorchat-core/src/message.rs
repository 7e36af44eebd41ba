// ABOUTME: Chat message model shared by the store, persistence, search and export.
// ABOUTME: Local messages carry a delivery marker; remote ones arrive already delivered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use tutorchat_transport::{Attachment, ComplexityTier, ContentKind, MessageMetadata, Reaction};

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sender {
    LocalUser,
    RemoteAgent,
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalUser => write!(f, "local-user"),
            Self::RemoteAgent => write!(f, "remote-agent"),
        }
    }
}

/// Delivery progress of a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// Handed to the transport, not yet acknowledged
    Pending,
    #[default]
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Unique within a session. Empty until the store assigns one.
    #[serde(default)]
    pub id: String,
    pub sender: Sender,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: ContentKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    /// Set when the content was edited after sending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    #[serde(default)]
    pub delivery: Delivery,
}

impl ChatMessage {
    /// A message typed by the local user, pending until the transport acks it
    pub fn local(content: impl Into<String>, kind: ContentKind) -> Self {
        Self {
            id: String::new(),
            sender: Sender::LocalUser,
            content: content.into(),
            kind,
            timestamp: Utc::now(),
            read: true,
            edited: None,
            reactions: Vec::new(),
            attachments: Vec::new(),
            metadata: None,
            delivery: Delivery::Pending,
        }
    }

    /// A message from the remote agent
    pub fn remote(content: impl Into<String>, kind: ContentKind) -> Self {
        Self {
            id: String::new(),
            sender: Sender::RemoteAgent,
            content: content.into(),
            kind,
            timestamp: Utc::now(),
            read: false,
            edited: None,
            reactions: Vec::new(),
            attachments: Vec::new(),
            metadata: None,
            delivery: Delivery::Sent,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_metadata(mut self, metadata: Option<MessageMetadata>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_local(&self) -> bool {
        self.sender == Sender::LocalUser
    }

    /// Local message still waiting on its transport ack; never evicted
    pub fn is_in_flight(&self) -> bool {
        self.is_local() && self.delivery == Delivery::Pending
    }

    /// Language tag for code messages, if the metadata carries one
    pub fn code_language(&self) -> Option<&str> {
        match &self.metadata {
            Some(MessageMetadata::Code { language }) => Some(language.as_str()),
            _ => None,
        }
    }
}

/// Partial update applied by `MessageStore::update_by_id`. Unset fields are
/// left alone; set fields overwrite (last write wins).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub read: Option<bool>,
    pub delivery: Option<Delivery>,
    pub reactions: Option<Vec<Reaction>>,
    pub metadata: Option<MessageMetadata>,
}

impl MessagePatch {
    pub fn delivery(delivery: Delivery) -> Self {
        Self {
            delivery: Some(delivery),
            ..Self::default()
        }
    }

    pub fn reactions(reactions: Vec<Reaction>) -> Self {
        Self {
            reactions: Some(reactions),
            ..Self::default()
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply to a message. Content changes stamp the edit marker.
    pub(crate) fn apply(self, message: &mut ChatMessage) {
        if let Some(content) = self.content {
            if content != message.content {
                message.content = content;
                message.edited = Some(Utc::now());
            }
        }
        if let Some(read) = self.read {
            message.read = read;
        }
        if let Some(delivery) = self.delivery {
            message.delivery = delivery;
        }
        if let Some(reactions) = self.reactions {
            message.reactions = reactions;
        }
        if let Some(metadata) = self.metadata {
            message.metadata = Some(metadata);
        }
    }
}
