// ABOUTME: Channel backend implementations.
// ABOUTME: Mock for deterministic tests and demos, WebSocket for a live agent server.

pub mod mock;
pub mod websocket;
