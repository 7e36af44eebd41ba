// ABOUTME: Ordered, capacity-bounded message log; the single source of truth for display.
// ABOUTME: Assigns ids, keeps timestamps non-decreasing and suppresses duplicate ids.

use crate::message::{ChatMessage, Delivery, MessagePatch, Reaction, Sender};
use std::collections::{HashSet, VecDeque};

pub const DEFAULT_MAX_MESSAGES: usize = 1000;

/// Result of appending a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(String),
    /// A message with this id is already in the log; nothing changed
    Duplicate(String),
}

impl AppendOutcome {
    pub fn id(&self) -> &str {
        match self {
            Self::Appended(id) | Self::Duplicate(id) => id,
        }
    }

    pub fn is_appended(&self) -> bool {
        matches!(self, Self::Appended(_))
    }
}

#[derive(Debug, Clone)]
pub struct MessageStore {
    messages: VecDeque<ChatMessage>,
    ids: HashSet<String>,
    max_messages: usize,
    next_seq: u64,
    /// Bumped on every mutation; derived views cache against it
    revision: u64,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl MessageStore {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            ids: HashSet::new(),
            max_messages: max_messages.max(1),
            next_seq: 1,
            revision: 0,
        }
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Append at the tail, assigning an id if absent and evicting from the head
    pub fn append(&mut self, mut message: ChatMessage) -> AppendOutcome {
        if message.id.is_empty() {
            message.id = self.generate_id();
        } else if self.ids.contains(&message.id) {
            tracing::debug!(id = %message.id, "Duplicate message suppressed");
            return AppendOutcome::Duplicate(message.id);
        }

        if let Some(tail) = self.messages.back() {
            if message.timestamp < tail.timestamp {
                message.timestamp = tail.timestamp;
            }
        }

        let id = message.id.clone();
        self.ids.insert(id.clone());
        self.messages.push_back(message);
        self.evict();
        self.revision += 1;
        AppendOutcome::Appended(id)
    }

    /// Patch a message in place. Returns false for unknown ids.
    pub fn update_by_id(&mut self, id: &str, patch: MessagePatch) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                patch.apply(message);
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    /// Replace a message's reaction list. Replaying the same list is a no-op.
    pub fn set_reactions(&mut self, id: &str, reactions: Vec<Reaction>) -> bool {
        let Some(message) = self.get(id) else {
            return false;
        };
        if message.reactions == reactions {
            return true;
        }
        self.update_by_id(id, MessagePatch::reactions(reactions))
    }

    /// The most recent `n` messages, oldest first
    pub fn take(&self, n: usize) -> Vec<ChatMessage> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn all(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    /// Message at a position in log order
    pub fn at(&self, index: usize) -> Option<&ChatMessage> {
        self.messages.get(index)
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.back()
    }

    /// Replace the log with previously persisted messages.
    ///
    /// Input order is kept; duplicate ids after the first are dropped.
    /// A message saved while still pending lost its send with the old
    /// session, so it comes back as failed.
    pub fn restore(&mut self, messages: Vec<ChatMessage>) {
        self.messages.clear();
        self.ids.clear();
        for mut message in messages {
            if message.delivery == Delivery::Pending {
                message.delivery = Delivery::Failed;
            }
            self.append(message);
        }
        self.revision += 1;
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
        self.revision += 1;
    }

    /// Mark every remote message read. Returns how many changed.
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for message in self.messages.iter_mut() {
            if message.sender == Sender::RemoteAgent && !message.read {
                message.read = true;
                changed += 1;
            }
        }
        if changed > 0 {
            self.revision += 1;
        }
        changed
    }

    pub fn unread_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.sender == Sender::RemoteAgent && !m.read)
            .count()
    }

    fn generate_id(&mut self) -> String {
        let seq = self.next_seq;
        self.next_seq += 1;
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        format!("msg-{}-{}", seq, &uuid[..8])
    }

    fn evict(&mut self) {
        while self.messages.len() > self.max_messages {
            // Oldest message that is not awaiting its ack
            let Some(index) = self.messages.iter().position(|m| !m.is_in_flight()) else {
                tracing::warn!(
                    len = self.messages.len(),
                    max = self.max_messages,
                    "Store over capacity, every message is in flight"
                );
                break;
            };
            if let Some(evicted) = self.messages.remove(index) {
                self.ids.remove(&evicted.id);
            }
        }
    }
}
