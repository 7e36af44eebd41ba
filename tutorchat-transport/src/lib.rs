// ABOUTME: Live-channel transport for the tutorchat session engine.
// ABOUTME: Wire events, the Transport trait, connector state machine, and mock/WebSocket backends.

pub mod address;
pub mod backoff;
pub mod config;
pub mod connector;
pub mod event;
pub mod handle;
pub mod registry;
pub mod traits;

pub mod backends;

pub use address::{ChannelAddress, SessionContext};
pub use backoff::{BackoffState, ReconnectPolicy};
pub use config::TransportConfig;
pub use connector::{ConnectionState, ConnectorConfig, EventHandler, SubscriptionId, TransportConnector};
pub use event::{
    Attachment, ComplexityTier, ContentKind, EventKind, EventPayload, InboundEvent,
    MessageMetadata, OutboundEvent, OutboundMessage, Reaction,
};
pub use handle::{Channel, ChannelEvent, ChannelHandle, EventReceiver};
pub use registry::TransportRegistry;
pub use traits::Transport;
