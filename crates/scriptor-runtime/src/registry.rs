//! Engine provider registry.
//!
//! Populated once at startup. Lookups accept either the engine type or its
//! alias; both share one namespace, so a type may not collide with another
//! provider's alias.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, RuntimeError};
use crate::provider::{EngineDescriptor, ScriptExecutorProvider};

/// Registry of engine providers keyed by type and alias.
#[derive(Default)]
pub struct EngineRegistry {
    providers: Vec<Arc<dyn ScriptExecutorProvider>>,
    index: HashMap<String, usize>,
}

impl EngineRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its type and alias.
    ///
    /// Fails with [`RuntimeError::DuplicateEngine`] if either token is taken.
    pub fn register(&mut self, provider: Arc<dyn ScriptExecutorProvider>) -> Result<()> {
        let descriptor = provider.descriptor().clone();
        for token in tokens(&descriptor) {
            if self.index.contains_key(token) {
                return Err(RuntimeError::DuplicateEngine(token.to_string()));
            }
        }

        let slot = self.providers.len();
        for token in tokens(&descriptor) {
            self.index.insert(token.to_string(), slot);
        }
        self.providers.push(provider);
        tracing::debug!(
            engine = %descriptor.engine_type,
            alias = %descriptor.alias,
            "Registered engine"
        );
        Ok(())
    }

    /// Find the provider for a type or alias.
    pub fn lookup(&self, token: &str) -> Result<Arc<dyn ScriptExecutorProvider>> {
        self.index
            .get(token)
            .map(|&slot| Arc::clone(&self.providers[slot]))
            .ok_or_else(|| RuntimeError::UnknownEngineType(token.to_string()))
    }

    /// Whether a type or alias is registered.
    pub fn contains(&self, token: &str) -> bool {
        self.index.contains_key(token)
    }

    /// Registered engines in registration order.
    pub fn descriptors(&self) -> Vec<EngineDescriptor> {
        self.providers
            .iter()
            .map(|p| p.descriptor().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

fn tokens(descriptor: &EngineDescriptor) -> impl Iterator<Item = &str> {
    let alias = (descriptor.alias != descriptor.engine_type).then_some(descriptor.alias.as_str());
    std::iter::once(descriptor.engine_type.as_str()).chain(alias)
}
