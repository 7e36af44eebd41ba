// ABOUTME: Durability layer persisting a session's message log through a key-value byte store.
// ABOUTME: SQLite-backed store for production, in-memory store with an optional quota for tests.

use crate::message::ChatMessage;
use crate::store::MessageStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub const DEFAULT_RESTORE_WINDOW: usize = 50;
const KEY_PREFIX: &str = "chat-history:";
const RECORD_VERSION: u32 = 1;

/// Byte-oriented key-value storage capability
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    /// Total byte budget across all values
    quota: Option<usize>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose writes fail once the total size would exceed `bytes`
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota: Some(bytes),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = lock(&self.entries);
        if let Some(quota) = self.quota {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            if others + value.len() > quota {
                anyhow::bail!(
                    "Storage quota exceeded: {} bytes requested, {} available",
                    value.len(),
                    quota.saturating_sub(others)
                );
            }
        }
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

// =============================================================================
// SQLite store
// =============================================================================

#[derive(Clone)]
pub struct SqliteKeyValueStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteKeyValueStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create history directory: {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open history database: {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS chat_history (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create chat_history table")?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Every stored key with the given prefix, sorted
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let db = lock(&self.db);
        let mut stmt = db.prepare(
            "SELECT key FROM chat_history WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key",
        )?;
        let pattern = format!(
            "{}%",
            prefix
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_")
        );
        let keys = stmt
            .query_map(params![pattern], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        // LIKE is case-insensitive for ASCII
        Ok(keys.into_iter().filter(|k| k.starts_with(prefix)).collect())
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let db = lock(&self.db);
        db.query_row(
            "SELECT value FROM chat_history WHERE key = ?1",
            params![key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .with_context(|| format!("Failed to read key {}", key))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let db = lock(&self.db);
        db.execute(
            "INSERT INTO chat_history (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("Failed to write key {}", key))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let db = lock(&self.db);
        db.execute("DELETE FROM chat_history WHERE key = ?1", params![key])
            .with_context(|| format!("Failed to delete key {}", key))?;
        Ok(())
    }
}

// =============================================================================
// History persistence
// =============================================================================

/// One persisted session log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord {
    version: u32,
    session_id: String,
    saved_at: DateTime<Utc>,
    messages: Vec<ChatMessage>,
}

/// Outcome of loading a session's history at mount
#[derive(Debug)]
pub struct LoadedHistory {
    pub messages: Vec<ChatMessage>,
    /// True when the messages came from storage rather than the welcome fallback
    pub restored: bool,
    /// Set when a stored record existed but could not be read
    pub error: Option<anyhow::Error>,
}

pub fn history_key(session_id: &str) -> String {
    format!("{}{}", KEY_PREFIX, session_id)
}

#[derive(Clone)]
pub struct HistoryPersistence {
    store: Arc<dyn KeyValueStore>,
    restore_window: usize,
}

impl HistoryPersistence {
    pub fn new(store: Arc<dyn KeyValueStore>, restore_window: usize) -> Self {
        Self {
            store,
            restore_window,
        }
    }

    pub fn restore_window(&self) -> usize {
        self.restore_window
    }

    /// Write the full log for a session
    pub fn save(&self, session_id: &str, messages: &MessageStore) -> Result<()> {
        let record = HistoryRecord {
            version: RECORD_VERSION,
            session_id: session_id.to_string(),
            saved_at: Utc::now(),
            messages: messages.all(),
        };
        let bytes = serde_json::to_vec(&record).context("Failed to serialize history")?;
        self.store
            .set(&history_key(session_id), &bytes)
            .context("Failed to persist history")?;
        tracing::debug!(session_id, count = record.messages.len(), "History saved");
        Ok(())
    }

    /// The most recent `restore_window` messages, or None when nothing is stored
    pub fn restore(&self, session_id: &str) -> Result<Option<Vec<ChatMessage>>> {
        let Some(bytes) = self.store.get(&history_key(session_id))? else {
            return Ok(None);
        };
        let record: HistoryRecord =
            serde_json::from_slice(&bytes).context("Corrupt history record")?;
        if record.version > RECORD_VERSION {
            anyhow::bail!("Unsupported history record version {}", record.version);
        }
        let mut messages = record.messages;
        let skip = messages.len().saturating_sub(self.restore_window);
        messages.drain(..skip);
        Ok(Some(messages))
    }

    /// Restore history, falling back to a single welcome message on absence
    /// or failure. Never errors.
    pub fn load_or_welcome(&self, session_id: &str, welcome: ChatMessage) -> LoadedHistory {
        match self.restore(session_id) {
            Ok(Some(messages)) if !messages.is_empty() => {
                tracing::info!(session_id, count = messages.len(), "History restored");
                LoadedHistory {
                    messages,
                    restored: true,
                    error: None,
                }
            }
            Ok(_) => LoadedHistory {
                messages: vec![welcome],
                restored: false,
                error: None,
            },
            Err(e) => {
                tracing::warn!(session_id, error = %e, "History unreadable, starting fresh");
                LoadedHistory {
                    messages: vec![welcome],
                    restored: false,
                    error: Some(e),
                }
            }
        }
    }

    pub fn clear(&self, session_id: &str) -> Result<()> {
        self.store.delete(&history_key(session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ContentKind;

    fn store_with(count: usize) -> MessageStore {
        let mut store = MessageStore::default();
        for i in 0..count {
            store.append(ChatMessage::remote(format!("m{}", i), ContentKind::Text));
        }
        store
    }

    fn welcome() -> ChatMessage {
        ChatMessage::remote("Welcome!", ContentKind::Text)
    }

    #[test]
    fn test_round_trip_truncated_to_window() {
        let persistence = HistoryPersistence::new(Arc::new(MemoryKeyValueStore::new()), 50);
        let store = store_with(80);
        persistence.save("s1", &store).unwrap();

        let restored = persistence.restore("s1").unwrap().unwrap();
        assert_eq!(restored.len(), 50);
        assert_eq!(restored[0].content, "m30");
        assert_eq!(restored, store.take(50));
    }

    #[test]
    fn test_missing_history_gives_welcome() {
        let persistence = HistoryPersistence::new(Arc::new(MemoryKeyValueStore::new()), 50);
        let loaded = persistence.load_or_welcome("nobody", welcome());
        assert!(!loaded.restored);
        assert!(loaded.error.is_none());
        assert_eq!(loaded.messages.len(), 1);
    }

    #[test]
    fn test_corrupt_record_falls_back_to_welcome() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(&history_key("s1"), b"{not json").unwrap();
        let persistence = HistoryPersistence::new(kv, 50);

        let loaded = persistence.load_or_welcome("s1", welcome());
        assert!(!loaded.restored);
        assert!(loaded.error.is_some());
        assert_eq!(loaded.messages[0].content, "Welcome!");
    }

    #[test]
    fn test_quota_exceeded_surfaces_error() {
        let persistence = HistoryPersistence::new(Arc::new(MemoryKeyValueStore::with_quota(64)), 50);
        let err = persistence.save("s1", &store_with(10)).unwrap_err();
        assert!(format!("{:#}", err).contains("quota"));
    }

    #[test]
    fn test_clear_removes_key() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let persistence = HistoryPersistence::new(kv.clone(), 50);
        persistence.save("s1", &store_with(2)).unwrap();
        assert_eq!(kv.len(), 1);
        persistence.clear("s1").unwrap();
        assert!(kv.is_empty());
        assert!(persistence.restore("s1").unwrap().is_none());
    }

    #[test]
    fn test_sqlite_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let kv = SqliteKeyValueStore::open(&dir.path().join("history.db")).unwrap();
        kv.set("chat-history:a", b"one").unwrap();
        kv.set("chat-history:a", b"two").unwrap();
        kv.set("other", b"x").unwrap();

        assert_eq!(kv.get("chat-history:a").unwrap(), Some(b"two".to_vec()));
        assert_eq!(kv.keys_with_prefix(KEY_PREFIX).unwrap(), vec!["chat-history:a"]);
        kv.delete("chat-history:a").unwrap();
        assert_eq!(kv.get("chat-history:a").unwrap(), None);
    }

    #[test]
    fn test_sqlite_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.db");
        {
            let kv = Arc::new(SqliteKeyValueStore::open(&path).unwrap());
            HistoryPersistence::new(kv, 50)
                .save("s1", &store_with(3))
                .unwrap();
        }
        let kv = Arc::new(SqliteKeyValueStore::open(&path).unwrap());
        let restored = HistoryPersistence::new(kv, 50).restore("s1").unwrap().unwrap();
        assert_eq!(restored.len(), 3);
    }
}
