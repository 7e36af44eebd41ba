// ABOUTME: Registry pattern for runtime transport selection.
// ABOUTME: Backends register factories; the engine creates one by name from config.

use crate::backends::mock::MockTransport;
use crate::backends::websocket::WebSocketTransport;
use crate::config::TransportConfig;
use crate::traits::Transport;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory that builds a transport from config
pub type TransportFactory = Box<dyn Fn(&TransportConfig) -> Result<Arc<dyn Transport>> + Send + Sync>;

pub struct TransportRegistry {
    factories: HashMap<String, TransportFactory>,
}

impl TransportRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a transport factory by name
    pub fn register<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&TransportConfig) -> Result<Arc<dyn Transport>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
        self
    }

    /// Create the transport named by `config.transport_type`
    pub fn create(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>> {
        let factory = self
            .factories
            .get(&config.transport_type)
            .ok_or_else(|| anyhow!("Unknown transport: {}", config.transport_type))?;
        factory(config)
    }

    /// Names of the registered transports, sorted
    pub fn available(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
            .register("mock", MockTransport::factory())
            .register("websocket", WebSocketTransport::factory())
    }
}
