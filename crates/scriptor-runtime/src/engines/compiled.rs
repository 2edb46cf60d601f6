//! Engines backed by an external compiler (`java`, `groovy`).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::cache::ArtifactCache;
use crate::compiler::Compiler;
use crate::context::{ExecutionContext, RequestContext};
use crate::error::Result;
use crate::executor::{ScriptExecutor, ScriptOutput};
use crate::provider::{EngineDescriptor, ScriptExecutorProvider, resolve_resource};
use crate::resource::ResourceStore;

/// Provider for a compiled language.
pub struct CompiledProvider {
    descriptor: EngineDescriptor,
    store: Arc<dyn ResourceStore>,
    cache: Arc<ArtifactCache>,
    compiler: Arc<dyn Compiler>,
}

impl CompiledProvider {
    pub fn new(
        descriptor: EngineDescriptor,
        store: Arc<dyn ResourceStore>,
        cache: Arc<ArtifactCache>,
        compiler: Arc<dyn Compiler>,
    ) -> Self {
        Self {
            descriptor,
            store,
            cache,
            compiler,
        }
    }

    /// The `java` engine.
    pub fn java(
        store: Arc<dyn ResourceStore>,
        cache: Arc<ArtifactCache>,
        compiler: Arc<dyn Compiler>,
    ) -> Self {
        Self::new(EngineDescriptor::new("java", "Java"), store, cache, compiler)
    }

    /// The `groovy` engine.
    pub fn groovy(
        store: Arc<dyn ResourceStore>,
        cache: Arc<ArtifactCache>,
        compiler: Arc<dyn Compiler>,
    ) -> Self {
        Self::new(
            EngineDescriptor::new("groovy", "Groovy"),
            store,
            cache,
            compiler,
        )
    }
}

#[async_trait]
impl ScriptExecutorProvider for CompiledProvider {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    async fn create_executor(&self, request: &RequestContext) -> Result<Box<dyn ScriptExecutor>> {
        let path = resolve_resource(self.store.as_ref(), &request.path).await?;
        Ok(Box::new(CompiledExecutor {
            path,
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            compiler: Arc::clone(&self.compiler),
        }))
    }
}

struct CompiledExecutor {
    path: String,
    store: Arc<dyn ResourceStore>,
    cache: Arc<ArtifactCache>,
    compiler: Arc<dyn Compiler>,
}

#[async_trait]
impl ScriptExecutor for CompiledExecutor {
    async fn execute(&mut self, ctx: &ExecutionContext) -> Result<ScriptOutput> {
        let artifact = self
            .cache
            .get_or_compile(&self.path, self.store.as_ref(), self.compiler.as_ref())
            .await?;
        debug!(
            path = %self.path,
            fingerprint = %artifact.fingerprint.short(),
            "Invoking compiled artifact"
        );
        let mut output = artifact.executable.invoke(ctx).await?;
        output.warnings = artifact.warnings.clone();
        Ok(output)
    }
}
