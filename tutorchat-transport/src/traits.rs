// ABOUTME: Transport trait that every channel backend implements.
// ABOUTME: Opening a channel yields a send handle and an inbound event receiver.

use crate::address::{ChannelAddress, SessionContext};
use crate::handle::Channel;
use anyhow::Result;
use futures::future::BoxFuture;

/// A way of reaching the remote conversational agent.
///
/// Implementations own the wire; the connector owns the lifecycle
/// (timeouts, state, reconnect, handler dispatch).
pub trait Transport: Send + Sync {
    /// Backend name for logging and metrics
    fn name(&self) -> &'static str;

    /// Open a channel scoped to one agent session
    fn open<'a>(
        &'a self,
        address: &'a ChannelAddress,
        context: &'a SessionContext,
    ) -> BoxFuture<'a, Result<Channel>>;
}
