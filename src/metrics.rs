// ABOUTME: Prometheus recorder for the chat client's counters
// ABOUTME: Rendered on demand by the !stats command

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global recorder and describe the counters the engine emits
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    metrics::describe_counter!("tutorchat_messages_sent_total", "Messages acknowledged by the transport");
    metrics::describe_counter!("tutorchat_messages_received_total", "Messages received from the agent");
    metrics::describe_counter!("tutorchat_send_failures_total", "Sends the transport rejected");
    metrics::describe_counter!("tutorchat_inbound_events_total", "Inbound transport events by kind");
    metrics::describe_counter!("tutorchat_reconnect_attempts_total", "Reconnect attempts after a dropped connection");
    metrics::describe_counter!("tutorchat_transcriptions_total", "Voice clips turned into composer text");
    metrics::describe_counter!("tutorchat_rewards_total", "Reward events by kind");

    Ok(handle)
}

/// Only the tutorchat_* sample lines of a Prometheus scrape
pub fn summarize(rendered: &str) -> Vec<&str> {
    rendered
        .lines()
        .filter(|line| line.starts_with("tutorchat_"))
        .collect()
}
