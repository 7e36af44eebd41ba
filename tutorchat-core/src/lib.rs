// ABOUTME: Chat-session engine for talking to a remote conversational agent
// ABOUTME: Message store, durability, voice and file pipelines, search, keymap and export

pub mod attachments;
pub mod capabilities;
pub mod composer;
pub mod config;
pub mod durability;
pub mod engine;
pub mod export;
pub mod keymap;
pub mod message;
pub mod notice;
pub mod paths;
pub mod rewards;
pub mod search;
pub mod session;
pub mod store;
pub mod testing;
pub mod voice;

pub use config::EngineConfig;
pub use engine::{ChatEngine, EngineBuilder, EngineEvent};
pub use message::{ChatMessage, Delivery, MessagePatch, Sender};
pub use notice::{Notice, SendRejected};
pub use store::{AppendOutcome, MessageStore};

// Re-export transport types the engine API exposes
pub use tutorchat_transport::{
    Attachment, ConnectionState, ContentKind, InboundEvent, MessageMetadata, Reaction,
};
