//! Runtime facade: wires store, cache, compilers, registry, metrics and storage.
//!
//! ```rust,ignore
//! let runtime = Runtime::from_config(&config)?;
//! let output = runtime
//!     .execute(RequestContext::new("java", "/apps/Service.java"))
//!     .await?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use scriptor_config::ScriptorConfig;
use tracing::{info, warn};

use crate::cache::{ArtifactCache, CacheStats};
use crate::compiler::ProcessCompiler;
use crate::context::{Dispatch, ExecutionContext, RequestContext};
use crate::engines::{CommandProvider, CompiledProvider, InterpretedProvider, JobProvider};
use crate::error::{Result, RuntimeError};
use crate::executor::ScriptOutput;
use crate::metrics::{MetricsSnapshot, RuntimeMetrics};
use crate::process::ProcessRunner;
use crate::provider::{EngineDescriptor, ScriptExecutorProvider};
use crate::registry::EngineRegistry;
use crate::resource::{FsResourceStore, MemoryResourceStore, ResourceStore, normalize_path};
use crate::scheduler::{Schedule, Scheduler, SchedulerHandle};
use crate::storage::Storage;
use crate::tasks::{JobTask, MetricsCaptureTask};

/// Cheap-to-clone handle to a running script runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    registry: EngineRegistry,
    store: Arc<dyn ResourceStore>,
    cache: Arc<ArtifactCache>,
    storage: Storage,
    metrics: RuntimeMetrics,
}

/// Builder for [`Runtime`].
pub struct RuntimeBuilder {
    store: Arc<dyn ResourceStore>,
    cache: Arc<ArtifactCache>,
    storage: Storage,
    providers: Vec<Arc<dyn ScriptExecutorProvider>>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self {
            store: Arc::new(MemoryResourceStore::new()),
            cache: Arc::new(ArtifactCache::new()),
            storage: Storage::in_memory(),
            providers: Vec::new(),
        }
    }
}

impl RuntimeBuilder {
    /// Use `store` for script resources (default: in-memory).
    pub fn store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.store = store;
        self
    }

    /// Use `storage` for the storage utility (default: in-memory).
    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = storage;
        self
    }

    /// Register a provider. Registration order is preserved.
    pub fn provider(mut self, provider: Arc<dyn ScriptExecutorProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Resource store providers should be built with.
    pub fn resource_store(&self) -> Arc<dyn ResourceStore> {
        Arc::clone(&self.store)
    }

    /// Artifact cache providers should be built with.
    pub fn artifact_cache(&self) -> Arc<ArtifactCache> {
        Arc::clone(&self.cache)
    }

    /// Register the engine named `engine` from configuration.
    pub fn engine(self, engine: &str, config: &ScriptorConfig) -> Result<Self> {
        let engines = config.engines();
        let work_dir: PathBuf = config.runtime().cache_dir();
        let run_timeout = Duration::from_secs(engines.run_timeout_secs);
        let store = self.resource_store();
        let cache = self.artifact_cache();

        let provider: Arc<dyn ScriptExecutorProvider> = match engine {
            "java" => Arc::new(CompiledProvider::java(
                store,
                cache,
                Arc::new(ProcessCompiler::new(
                    "java",
                    engines.java.clone(),
                    work_dir.clone(),
                    run_timeout,
                )?),
            )),
            "groovy" => Arc::new(CompiledProvider::groovy(
                store,
                cache,
                Arc::new(ProcessCompiler::new(
                    "groovy",
                    engines.groovy.clone(),
                    work_dir.clone(),
                    run_timeout,
                )?),
            )),
            "js" => Arc::new(InterpretedProvider::js(store, &engines.js, run_timeout)),
            "js-debug" => Arc::new(InterpretedProvider::js_debug(
                store,
                &engines.js,
                work_dir,
                run_timeout,
            )),
            "command" => Arc::new(CommandProvider::new(
                store,
                ProcessRunner::from_config(&config.command()),
            )),
            "job" => Arc::new(JobProvider::new(store)),
            other => return Err(RuntimeError::UnknownEngineType(other.to_string())),
        };
        Ok(self.provider(provider))
    }

    pub fn build(self) -> Result<Runtime> {
        let mut registry = EngineRegistry::new();
        for provider in self.providers {
            registry.register(provider)?;
        }
        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                registry,
                store: self.store,
                cache: self.cache,
                storage: self.storage,
                metrics: RuntimeMetrics::new(),
            }),
        })
    }
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Build a runtime from configuration: filesystem store under the
    /// resource root, every enabled engine, and the configured storage.
    pub fn from_config(config: &ScriptorConfig) -> Result<Self> {
        config.validate()?;
        let root = config.runtime().resource_root();
        let storage = Storage::from_config(&config.storage())?;

        let mut builder = Self::builder()
            .store(Arc::new(FsResourceStore::new(&root)))
            .storage(storage);
        for engine in &config.engines().enabled {
            builder = builder.engine(engine, config)?;
        }
        let runtime = builder.build()?;
        info!(
            resource_root = %root.display(),
            engines = runtime.inner.registry.len(),
            "Runtime initialized"
        );
        Ok(runtime)
    }

    /// Look up the engine, build an executor and run the request.
    pub async fn execute(&self, request: RequestContext) -> Result<ScriptOutput> {
        let provider = self.inner.registry.lookup(&request.engine)?;
        let engine = provider.engine_type().to_string();
        let path = request.path.clone();
        let request_id = request.request_id;
        let start = Instant::now();

        let result = async {
            let mut executor = provider.create_executor(&request).await?;
            let dispatcher: Arc<dyn Dispatch> = Arc::new(self.clone());
            let ctx = ExecutionContext::new(request).with_dispatcher(dispatcher);
            executor.execute(&ctx).await
        }
        .await;

        let elapsed = start.elapsed();
        self.inner.metrics.record(&engine, result.is_ok(), elapsed);
        match &result {
            Ok(output) => info!(
                engine = %engine,
                path = %path,
                request_id = %request_id,
                exit_code = output.exit_code,
                elapsed = ?elapsed,
                "Script executed"
            ),
            Err(e) => warn!(
                engine = %engine,
                path = %path,
                request_id = %request_id,
                elapsed = ?elapsed,
                error = %e,
                "Script execution failed"
            ),
        }
        result
    }

    /// Store (or overwrite) a script resource. Returns the normalised path.
    pub async fn deploy(&self, path: &str, content: &[u8]) -> Result<String> {
        let normalized = normalize_path(path)?;
        self.inner.store.write(&normalized, content).await?;
        info!(path = %normalized, bytes = content.len(), "Resource deployed");
        Ok(normalized)
    }

    /// Remove a script resource and any artifact compiled from it.
    pub async fn delete_resource(&self, path: &str) -> Result<bool> {
        let normalized = normalize_path(path)?;
        let removed = self.inner.store.delete(&normalized).await?;
        self.inner.cache.invalidate(&normalized);
        Ok(removed)
    }

    /// Registered engines in registration order.
    pub fn engines(&self) -> Vec<EngineDescriptor> {
        self.inner.registry.descriptors()
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.inner.store
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.inner.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    pub fn metrics(&self) -> &RuntimeMetrics {
        &self.inner.metrics
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot(self.cache_stats())
    }

    /// Scheduler holding the metrics task (when enabled) and every `[[jobs]]` entry.
    pub fn scheduler(&self, config: &ScriptorConfig) -> Result<Scheduler> {
        let mut scheduler = Scheduler::new();
        let section = config.scheduler();
        if section.enabled {
            scheduler.add(
                Arc::new(MetricsCaptureTask::new(
                    self.clone(),
                    section.metrics_retention,
                )),
                Schedule::every(Duration::from_secs(section.metrics_interval_secs)),
            )?;
        }
        for job in &config.jobs {
            scheduler.add(
                Arc::new(JobTask::new(self.clone(), &job.path)),
                Schedule::every(Duration::from_secs(job.interval_secs))
                    .with_initial_delay(Duration::from_secs(job.initial_delay_secs)),
            )?;
        }
        Ok(scheduler)
    }

    /// Build and start the scheduler.
    pub fn schedule(&self, config: &ScriptorConfig) -> Result<SchedulerHandle> {
        Ok(self.scheduler(config)?.start())
    }
}

#[async_trait]
impl Dispatch for Runtime {
    async fn dispatch(&self, request: RequestContext) -> Result<ScriptOutput> {
        self.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptor_config::{EnginesSection, JobSchedule, SchedulerSection};

    #[test]
    fn test_from_config_registers_enabled_engines() {
        let config = ScriptorConfig {
            engines: Some(EnginesSection {
                enabled: vec!["js".into(), "command".into(), "job".into()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let runtime = Runtime::from_config(&config).unwrap();
        let types: Vec<String> = runtime
            .engines()
            .into_iter()
            .map(|d| d.engine_type)
            .collect();
        assert_eq!(types, ["js", "command", "job"]);
    }

    #[test]
    fn test_default_config_registers_all_engines() {
        let runtime = Runtime::from_config(&ScriptorConfig::default()).unwrap();
        assert_eq!(runtime.engines().len(), 6);
    }

    #[test]
    fn test_unknown_configured_engine() {
        let config = ScriptorConfig {
            engines: Some(EnginesSection {
                enabled: vec!["cobol".into()],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(
            Runtime::from_config(&config),
            Err(RuntimeError::UnknownEngineType(ref t)) if t == "cobol"
        ));
    }

    #[test]
    fn test_duplicate_configured_engine() {
        let config = ScriptorConfig {
            engines: Some(EnginesSection {
                enabled: vec!["js".into(), "js".into()],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(
            Runtime::from_config(&config),
            Err(RuntimeError::DuplicateEngine(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_engine_request() {
        let runtime = Runtime::builder().build().unwrap();
        let err = runtime
            .execute(RequestContext::new("cobol", "/x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownEngineType(_)));
    }

    #[tokio::test]
    async fn test_deploy_and_delete() {
        let runtime = Runtime::builder().build().unwrap();
        assert_eq!(runtime.deploy("apps//a.js", b"1").await.unwrap(), "/apps/a.js");
        assert!(runtime.store().exists("/apps/a.js").await);
        assert!(runtime.delete_resource("/apps/a.js").await.unwrap());
        assert!(!runtime.delete_resource("/apps/a.js").await.unwrap());
    }

    #[test]
    fn test_scheduler_from_config() {
        let runtime = Runtime::builder().build().unwrap();
        let config = ScriptorConfig {
            jobs: vec![JobSchedule {
                path: "/jobs/a.toml".into(),
                interval_secs: 60,
                initial_delay_secs: 5,
            }],
            ..Default::default()
        };
        assert_eq!(runtime.scheduler(&config).unwrap().len(), 2);

        let config = ScriptorConfig {
            scheduler: Some(SchedulerSection {
                enabled: false,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(runtime.scheduler(&config).unwrap().is_empty());
    }
}
