//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tutorchat_core::EngineConfig;

#[derive(Debug, Parser)]
#[command(author, version, about = "Terminal chat with a remote tutoring agent", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for history, exports and logs
    #[arg(short, long, global = true)]
    pub data_dir: Option<String>,

    /// Agent endpoint URL
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Transport backend (websocket or mock)
    #[arg(long, global = true)]
    pub transport: Option<String>,

    /// Record counters for the !stats command
    #[arg(long, global = true)]
    pub metrics: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Start an interactive chat (the default)
    Chat {
        /// Agent to talk to
        #[arg(short, long)]
        agent: Option<String>,
        /// Resume this session instead of starting a new one
        #[arg(short, long)]
        session: Option<String>,
        /// Your user id
        #[arg(short, long)]
        user: Option<String>,
    },
    /// List sessions with stored history
    Sessions,
    /// Print a session's stored history
    History {
        session: String,
    },
    /// Delete a session's stored history
    Clear {
        session: String,
    },
    /// Export a session's stored history as JSON
    Export {
        session: String,
        /// Agent the session was held with
        #[arg(short, long)]
        agent: Option<String>,
    },
}

impl Cli {
    /// Command-line flags win over file and environment settings
    pub fn apply_overrides(&self, config: &mut EngineConfig) {
        if let Some(dir) = &self.data_dir {
            config.history.data_dir = Some(dir.clone());
        }
        if let Some(url) = &self.url {
            config.transport.url = url.clone();
        }
        if let Some(transport) = &self.transport {
            config.transport.transport_type = transport.clone();
        }
        if let Some(Commands::Chat { user: Some(user), .. }) = &self.command {
            config.chat.user_id = Some(user.clone());
        }
    }

    /// The subcommand to run; a bare invocation starts a chat
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Chat {
            agent: None,
            session: None,
            user: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_invocation_is_chat() {
        let cli = Cli::parse_from(["tutorchat"]);
        assert!(matches!(
            cli.command(),
            Commands::Chat { agent: None, session: None, user: None }
        ));
    }

    #[test]
    fn test_overrides_apply() {
        let cli = Cli::parse_from([
            "tutorchat",
            "--url",
            "ws://localhost:9000/ws/",
            "--transport",
            "mock",
            "chat",
            "--agent",
            "python-tutor",
            "--user",
            "student-7",
        ]);
        let mut config = EngineConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.transport.url, "ws://localhost:9000/ws/");
        assert_eq!(config.transport.transport_type, "mock");
        assert_eq!(config.chat.user_id.as_deref(), Some("student-7"));
    }

    #[test]
    fn test_export_takes_session() {
        let cli = Cli::parse_from(["tutorchat", "export", "s-1", "--agent", "py"]);
        match cli.command() {
            Commands::Export { session, agent } => {
                assert_eq!(session, "s-1");
                assert_eq!(agent.as_deref(), Some("py"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
