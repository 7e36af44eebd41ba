// ABOUTME: Engine configuration parsed from TOML with environment variable overrides
// ABOUTME: Sections for transport, history, voice, export, keybindings, chat defaults and agents
use crate::durability::DEFAULT_RESTORE_WINDOW;
use crate::paths;
use crate::session::AgentProfile;
use crate::store::DEFAULT_MAX_MESSAGES;
use crate::voice::VoiceSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tutorchat_transport::TransportConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub voice: VoiceSettings,
    #[serde(default)]
    pub export: ExportConfig,
    /// Action name to chord string, e.g. `toggle-search = "Ctrl+F"`
    #[serde(default)]
    pub keybindings: HashMap<String, String>,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub agents: Vec<AgentProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_restore_window")]
    pub restore_window: usize,
    /// Root for history, exports and logs
    pub data_dir: Option<String>,
    /// SQLite file; defaults to history.db under the data dir
    pub database: Option<String>,
}

fn default_max_messages() -> usize {
    DEFAULT_MAX_MESSAGES
}

fn default_restore_window() -> usize {
    DEFAULT_RESTORE_WINDOW
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            restore_window: default_restore_window(),
            data_dir: None,
            database: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Defaults to exports/ under the data dir
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Agent to open when none is named on the command line
    #[serde(default = "default_agent")]
    pub agent: String,
    pub user_id: Option<String>,
    #[serde(default = "default_code_language")]
    pub code_language: String,
}

fn default_agent() -> String {
    "tutor".to_string()
}

fn default_code_language() -> String {
    crate::composer::DEFAULT_CODE_LANGUAGE.to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            agent: default_agent(),
            user_id: None,
            code_language: default_code_language(),
        }
    }
}

impl EngineConfig {
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config TOML")?;
        Ok(config)
    }

    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("TUTORCHAT_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!(path = %env_path, "TUTORCHAT_CONFIG_PATH does not exist");
        }

        let local_config = PathBuf::from("tutorchat.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Load from the first config file found, then apply environment overrides
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    /// Like `load`, but an explicit path wins over the search order and must exist
    pub fn load_with(explicit: Option<&Path>) -> Result<Self> {
        let found = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_config_file(),
        };
        let mut config = if let Some(config_path) = found {
            tracing::info!(path = %config_path.display(), "Loading configuration from file");
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply TUTORCHAT_* overrides from a variable lookup
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(val) = get("TUTORCHAT_URL") {
            self.transport.url = val;
        }
        if let Some(val) = get("TUTORCHAT_TRANSPORT") {
            self.transport.transport_type = val;
        }
        if let Some(val) = get("TUTORCHAT_MAX_MESSAGES") {
            self.history.max_messages = val.parse().with_context(|| {
                format!("TUTORCHAT_MAX_MESSAGES must be a positive number, got: {}", val)
            })?;
        }
        if let Some(val) = get("TUTORCHAT_DATA_DIR") {
            self.history.data_dir = Some(val);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.history.max_messages == 0 {
            anyhow::bail!("history.max_messages must be at least 1");
        }
        if self.history.restore_window == 0 {
            anyhow::bail!("history.restore_window must be at least 1");
        }
        url::Url::parse(&self.transport.url)
            .with_context(|| format!("Invalid transport.url: {}", self.transport.url))?;
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        match &self.history.data_dir {
            Some(dir) => PathBuf::from(paths::expand_tilde(dir)),
            None => paths::data_dir(),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        match &self.history.database {
            Some(path) => PathBuf::from(paths::expand_tilde(path)),
            None => paths::history_db_in(&self.data_dir()),
        }
    }

    pub fn export_dir(&self) -> PathBuf {
        match &self.export.directory {
            Some(dir) => PathBuf::from(paths::expand_tilde(dir)),
            None => paths::export_dir_in(&self.data_dir()),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        paths::log_dir_in(&self.data_dir())
    }
}
