// ABOUTME: Send+Sync handle onto an open channel plus its inbound event receiver.
// ABOUTME: Backends run a worker task; the handle talks to it over command channels.

use crate::event::{InboundEvent, OutboundEvent};
use anyhow::Result;
use tokio::sync::{mpsc, oneshot};

/// Commands sent from a ChannelHandle to the backend worker
#[derive(Debug)]
pub enum Command {
    Send {
        event: OutboundEvent,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Items a backend delivers on the inbound side of a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A decoded event from the remote agent
    Inbound(InboundEvent),
    /// The channel failed and will deliver nothing further
    Failed { reason: String },
}

/// Cloneable handle for emitting events on an open channel
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    tx: mpsc::Sender<Command>,
    name: &'static str,
}

impl ChannelHandle {
    pub fn new(tx: mpsc::Sender<Command>, name: &'static str) -> Self {
        Self { tx, name }
    }

    /// Backend name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True once the backend worker has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Emit an event, resolving once the backend has accepted or rejected it
    pub async fn send(&self, event: OutboundEvent) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Send {
                event,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("Channel worker closed"))?;
        reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("Channel worker dropped reply channel"))?
    }

    /// Close the channel. Closing an already-closed channel is a no-op.
    pub async fn close(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::Close { reply: reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }
    }
}

/// Receiver for inbound channel events.
///
/// This is `Send` so it can be moved into the connector's pump task.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<ChannelEvent>,
}

impl EventReceiver {
    pub fn new(rx: mpsc::Receiver<ChannelEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event, or None once the backend has hung up
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        self.rx.try_recv().ok()
    }
}

/// An open channel: the outbound handle and the inbound receiver
#[derive(Debug)]
pub struct Channel {
    pub handle: ChannelHandle,
    pub events: EventReceiver,
}
