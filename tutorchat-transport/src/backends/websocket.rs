// ABOUTME: WebSocket transport speaking JSON text frames to a live agent server.
// ABOUTME: One writer task drains commands, one reader task decodes inbound frames.

use crate::address::{ChannelAddress, SessionContext};
use crate::event::InboundEvent;
use crate::handle::{Channel, ChannelEvent, ChannelHandle, Command, EventReceiver};
use crate::traits::Transport;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }

    /// Factory function for the registry
    pub fn factory() -> crate::registry::TransportFactory {
        Box::new(|_config: &crate::config::TransportConfig| -> Result<Arc<dyn Transport>> {
            Ok(Arc::new(WebSocketTransport::new()))
        })
    }
}

impl Transport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn open<'a>(
        &'a self,
        address: &'a ChannelAddress,
        context: &'a SessionContext,
    ) -> BoxFuture<'a, Result<Channel>> {
        Box::pin(async move {
            tracing::info!(
                url = %address,
                session_id = %context.session_id,
                "Connecting WebSocket channel"
            );
            let (ws_stream, _) = connect_async(address.as_str())
                .await
                .with_context(|| format!("Failed to connect to {}", address.url()))?;
            let (mut write, mut read) = ws_stream.split();

            let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(64);
            let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(256);

            tokio::spawn(async move {
                while let Some(cmd) = cmd_rx.recv().await {
                    match cmd {
                        Command::Send { event, reply } => {
                            let result = match event.to_json() {
                                Ok(json) => write
                                    .send(Message::Text(json.into()))
                                    .await
                                    .context("WebSocket write failed"),
                                Err(e) => Err(e),
                            };
                            let _ = reply.send(result);
                        }
                        Command::Close { reply } => {
                            if let Err(e) = write.close().await {
                                tracing::debug!(error = %e, "WebSocket close handshake failed");
                            }
                            let _ = reply.send(());
                            break;
                        }
                    }
                }
            });

            tokio::spawn(async move {
                let reason = loop {
                    match read.next().await {
                        Some(Ok(Message::Text(text))) => match InboundEvent::parse(text.as_str()) {
                            Ok(event) => {
                                if event_tx.send(ChannelEvent::Inbound(event)).await.is_err() {
                                    // Receiver gone, connector tore down
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Dropping malformed frame");
                            }
                        },
                        Some(Ok(Message::Close(frame))) => {
                            break match frame {
                                Some(frame) => format!("closed by server: {}", frame.reason),
                                None => "closed by server".to_string(),
                            };
                        }
                        Some(Ok(_)) => {} // pings, pongs, binary
                        Some(Err(e)) => break format!("WebSocket error: {}", e),
                        None => break "stream ended".to_string(),
                    }
                };
                tracing::info!(%reason, "WebSocket channel ended");
                let _ = event_tx.send(ChannelEvent::Failed { reason }).await;
            });

            Ok(Channel {
                handle: ChannelHandle::new(cmd_tx, "websocket"),
                events: EventReceiver::new(event_rx),
            })
        })
    }
}
