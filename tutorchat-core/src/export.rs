// ABOUTME: Export serializer snapshotting a session into a portable JSON document.
// ABOUTME: Artifacts are named from the agent and export time and handed to an ArtifactSink.

use crate::message::ChatMessage;
use crate::session::{AgentProfile, Session};
use crate::store::MessageStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

const EXPORT_VERSION: u32 = 1;

/// Session metadata plus the full log. Attachments are referenced by URL only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub version: u32,
    pub session_id: String,
    pub agent: AgentProfile,
    pub exported_at: DateTime<Utc>,
    pub message_count: usize,
    pub messages: Vec<ChatMessage>,
}

impl ExportDocument {
    pub fn snapshot(session: &Session, store: &MessageStore, exported_at: DateTime<Utc>) -> Self {
        let messages = store.all();
        Self {
            version: EXPORT_VERSION,
            session_id: session.id.clone(),
            agent: session.agent.clone(),
            exported_at,
            message_count: messages.len(),
            messages,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize export")
    }

    /// Deterministic artifact name for this document
    pub fn artifact_name(&self) -> String {
        artifact_name(&self.agent.name, self.exported_at)
    }
}

fn slug_separator() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"[^a-z0-9]+").ok())
        .as_ref()
}

pub fn slugify(name: &str) -> String {
    let lower = name.to_lowercase();
    let slug = match slug_separator() {
        Some(pattern) => pattern.replace_all(&lower, "-").into_owned(),
        None => lower,
    };
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "agent".to_string()
    } else {
        slug.to_string()
    }
}

/// `chat-<agent-slug>-<YYYYMMDD-HHMMSS>.json`
pub fn artifact_name(agent_name: &str, at: DateTime<Utc>) -> String {
    format!("chat-{}-{}.json", slugify(agent_name), at.format("%Y%m%d-%H%M%S"))
}

/// Destination for exported documents
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Deliver the document under `name`, returning where it landed
    async fn deliver(&self, name: &str, document: &ExportDocument) -> Result<String>;
}

/// Writes exports as files into one directory
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn deliver(&self, name: &str, document: &ExportDocument) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create export directory: {}", self.dir.display()))?;
        let path = self.dir.join(name);
        let json = document.to_json()?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), messages = document.message_count, "Session exported");
        Ok(path.display().to_string())
    }
}
