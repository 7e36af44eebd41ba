// ABOUTME: Channel addressing and per-session context for opening a transport channel.
// ABOUTME: Scopes every channel URL to one agent and one session.

use anyhow::{Context, Result};
use url::Url;

/// Identity of the conversation a channel is opened for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub agent_id: String,
    pub session_id: String,
    /// Local user identifier, forwarded as `user_id` when known
    pub user_id: Option<String>,
}

impl SessionContext {
    pub fn new(agent_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Room the server groups this conversation under
    pub fn room(&self) -> String {
        format!("chat_{}", self.agent_id)
    }
}

/// Fully resolved channel endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAddress {
    url: Url,
}

impl ChannelAddress {
    /// Scope a base endpoint to the given session.
    ///
    /// Query parameters already present on the base URL are preserved.
    pub fn for_session(base: &str, context: &SessionContext) -> Result<Self> {
        let mut url = Url::parse(base).with_context(|| format!("Invalid channel URL: {}", base))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("room", &context.room());
            query.append_pair("agent_id", &context.agent_id);
            query.append_pair("session_id", &context.session_id);
            if let Some(user_id) = &context.user_id {
                query.append_pair("user_id", user_id);
            }
        }
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl std::fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}
