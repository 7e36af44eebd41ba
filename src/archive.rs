// ABOUTME: Offline access to stored chat history for the non-interactive subcommands
// ABOUTME: Lists, prints, clears and exports sessions straight from the history database

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tutorchat_core::durability::{history_key, HistoryPersistence, SqliteKeyValueStore};
use tutorchat_core::export::{ArtifactSink, DirectorySink, ExportDocument};
use tutorchat_core::session::{AgentDirectory, Session, StaticAgentDirectory};
use tutorchat_core::{ChatMessage, EngineConfig, MessageStore};

pub struct Archive {
    config: EngineConfig,
    kv: SqliteKeyValueStore,
}

impl Archive {
    pub fn open(config: EngineConfig) -> Result<Self> {
        let kv = SqliteKeyValueStore::open(&config.database_path())
            .context("Failed to open history database")?;
        Ok(Self { config, kv })
    }

    fn persistence(&self) -> HistoryPersistence {
        // Offline reads want the whole record, not the restore window
        HistoryPersistence::new(Arc::new(self.kv.clone()), usize::MAX)
    }

    /// Ids of every session with stored history, sorted
    pub fn sessions(&self) -> Result<Vec<String>> {
        let prefix = history_key("");
        let mut ids: Vec<String> = self
            .kv
            .keys_with_prefix(&prefix)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub fn messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        self.persistence()
            .restore(session_id)?
            .with_context(|| format!("No history for session {}", session_id))
    }

    pub fn clear(&self, session_id: &str) -> Result<()> {
        self.persistence().clear(session_id)?;
        tracing::info!(session_id, "History cleared");
        Ok(())
    }

    /// Write a session to the export directory, returning where it landed
    pub async fn export(&self, session_id: &str, agent_id: Option<&str>) -> Result<String> {
        let messages = self.messages(session_id)?;
        let agent_id = agent_id.unwrap_or(&self.config.chat.agent);
        let directory = StaticAgentDirectory::from_profiles(self.config.agents.clone());
        let session = Session::new(directory.resolve(agent_id), Some(session_id.to_string()));

        let mut store = MessageStore::new(self.config.history.max_messages);
        store.restore(messages);
        let document = ExportDocument::snapshot(&session, &store, Utc::now());

        let sink = DirectorySink::new(self.config.export_dir());
        sink.deliver(&document.artifact_name(), &document).await
    }
}
