// ABOUTME: Root library for the tutorchat terminal client
// ABOUTME: Command parsing, rendering and the stdin-driven chat shell over tutorchat-core

pub mod archive;
pub mod cli;
pub mod commands;
pub mod metrics;
pub mod render;
pub mod terminal;

// Re-export the engine crates for convenience
pub use tutorchat_core::{config, ChatEngine, EngineConfig};
pub use tutorchat_transport::{ConnectionState, TransportRegistry};
