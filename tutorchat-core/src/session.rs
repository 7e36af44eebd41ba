// ABOUTME: Chat session identity and agent profiles supplied through an injected directory.
// ABOUTME: Sessions get a UUID v4 id when none is given and carry the agent's display metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tutorchat_transport::SessionContext;

/// Display metadata for a remote agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    /// Greeting shown when a session has no history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub welcome: Option<String>,
}

impl AgentProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: Vec::new(),
            personality: None,
            welcome: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = Some(personality.into());
        self
    }

    pub fn with_welcome(mut self, welcome: impl Into<String>) -> Self {
        self.welcome = Some(welcome.into());
        self
    }

    pub fn welcome_text(&self) -> String {
        match &self.welcome {
            Some(text) => text.clone(),
            None => format!(
                "Hi! I'm {}. Ask me anything to get started.",
                self.name
            ),
        }
    }
}

/// Source of agent profiles
pub trait AgentDirectory: Send + Sync {
    fn profile(&self, agent_id: &str) -> Option<AgentProfile>;

    fn agents(&self) -> Vec<AgentProfile>;

    /// Profile for an agent, or a bare one named after its id
    fn resolve(&self, agent_id: &str) -> AgentProfile {
        self.profile(agent_id)
            .unwrap_or_else(|| AgentProfile::new(agent_id, agent_id))
    }
}

/// Fixed set of profiles, typically loaded from config
#[derive(Debug, Clone, Default)]
pub struct StaticAgentDirectory {
    profiles: HashMap<String, AgentProfile>,
}

impl StaticAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, profile: AgentProfile) -> Self {
        self.profiles.insert(profile.id.clone(), profile);
        self
    }

    pub fn from_profiles(profiles: impl IntoIterator<Item = AgentProfile>) -> Self {
        profiles.into_iter().fold(Self::new(), Self::with)
    }
}

impl AgentDirectory for StaticAgentDirectory {
    fn profile(&self, agent_id: &str) -> Option<AgentProfile> {
        self.profiles.get(agent_id).cloned()
    }

    fn agents(&self) -> Vec<AgentProfile> {
        let mut agents: Vec<AgentProfile> = self.profiles.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }
}

/// One conversation between the local user and an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub agent: AgentProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Start a session, generating an id unless one is given
    pub fn new(agent: AgentProfile, id: Option<String>) -> Self {
        let id = id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self {
            id,
            agent,
            user_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent.id
    }

    /// Transport-level view of this session
    pub fn context(&self) -> SessionContext {
        let context = SessionContext::new(self.agent.id.clone(), self.id.clone());
        match &self.user_id {
            Some(user) => context.with_user(user.clone()),
            None => context,
        }
    }
}
