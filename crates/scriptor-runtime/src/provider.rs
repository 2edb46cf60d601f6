//! Engine providers: one per engine type, each building per-request executors.

use async_trait::async_trait;
use serde::Serialize;

use crate::context::RequestContext;
use crate::error::{Result, RuntimeError};
use crate::executor::ScriptExecutor;
use crate::resource::{ResourceStore, normalize_path};

/// Identity of an engine: canonical type plus a user-facing alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EngineDescriptor {
    #[serde(rename = "type")]
    pub engine_type: String,
    pub alias: String,
}

impl EngineDescriptor {
    pub fn new(engine_type: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            engine_type: engine_type.into(),
            alias: alias.into(),
        }
    }
}

/// Builds executors for one engine type.
///
/// `create_executor` may touch the resource store but never runs the script.
#[async_trait]
pub trait ScriptExecutorProvider: Send + Sync {
    fn descriptor(&self) -> &EngineDescriptor;

    fn engine_type(&self) -> &str {
        &self.descriptor().engine_type
    }

    fn alias(&self) -> &str {
        &self.descriptor().alias
    }

    /// Build a fresh executor bound to `request.path`.
    async fn create_executor(&self, request: &RequestContext) -> Result<Box<dyn ScriptExecutor>>;
}

/// Normalise the request path and check the resource exists.
///
/// Fails with [`RuntimeError::ExecutorConstruction`] otherwise.
pub async fn resolve_resource(store: &dyn ResourceStore, path: &str) -> Result<String> {
    let normalized = normalize_path(path).map_err(|e| RuntimeError::ExecutorConstruction {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    if !store.exists(&normalized).await {
        return Err(RuntimeError::ExecutorConstruction {
            path: normalized,
            message: "resource does not exist".to_string(),
        });
    }
    Ok(normalized)
}
