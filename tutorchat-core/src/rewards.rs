// ABOUTME: Fire-and-forget reward calls to the gamification collaborator.
// ABOUTME: Interaction, send and receive awards carry session/agent ids and a metric.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardKind {
    /// A remote reply landed in the log
    Interaction,
    /// A local message was accepted by the transport
    Send,
    /// A file arrived from the agent
    Receive,
}

impl RewardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interaction => "interaction",
            Self::Send => "send",
            Self::Receive => "receive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardEvent {
    pub kind: RewardKind,
    pub session_id: String,
    pub agent_id: String,
    pub message_length: usize,
    /// Time since the last local send, when a reply answers one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

#[async_trait]
pub trait RewardSink: Send + Sync {
    async fn award(&self, event: RewardEvent) -> Result<()>;
}

/// Sink that only records awards in the log
#[derive(Debug, Default)]
pub struct LoggingRewardSink;

#[async_trait]
impl RewardSink for LoggingRewardSink {
    async fn award(&self, event: RewardEvent) -> Result<()> {
        tracing::info!(
            kind = event.kind.as_str(),
            session_id = %event.session_id,
            agent_id = %event.agent_id,
            message_length = event.message_length,
            elapsed_ms = ?event.elapsed_ms,
            "Reward awarded"
        );
        Ok(())
    }
}

/// Send an award without waiting; failures are logged and dropped
pub fn dispatch(sink: &Arc<dyn RewardSink>, event: RewardEvent) {
    metrics::counter!("tutorchat_rewards_total", "kind" => event.kind.as_str()).increment(1);
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        let kind = event.kind;
        if let Err(e) = sink.award(event).await {
            tracing::warn!(kind = kind.as_str(), error = %e, "Reward call failed");
        }
    });
}
