//! The `job` engine: a TOML flow of steps dispatched back through the runtime.
//!
//! ```toml
//! name = "nightly"
//! description = "Rebuild and report"
//!
//! [[steps]]
//! name = "build"
//! engine = "command"
//! path = "/jobs/build.json"
//!
//! [[steps]]
//! name = "report"
//! engine = "js"
//! path = "/jobs/report.js"
//! params = { channel = "ops" }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::context::{ExecutionContext, RequestContext};
use crate::error::{Result, RuntimeError};
use crate::executor::{ScriptExecutor, ScriptOutput};
use crate::provider::{EngineDescriptor, ScriptExecutorProvider, resolve_resource};
use crate::resource::ResourceStore;

/// Deepest allowed nesting of jobs dispatching jobs.
pub const MAX_JOB_DEPTH: u32 = 8;

/// Parsed job resource.
#[derive(Debug, Clone, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<JobStep>,
}

/// One step of a job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStep {
    pub name: String,
    pub engine: String,
    pub path: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl JobDefinition {
    pub fn parse(path: &str, content: &str) -> Result<Self> {
        let definition: Self = toml::from_str(content)
            .map_err(|e| RuntimeError::invalid_definition(path, e.to_string()))?;
        if definition.steps.is_empty() {
            return Err(RuntimeError::invalid_definition(path, "job has no steps"));
        }
        Ok(definition)
    }
}

/// Provider for the `job` engine.
pub struct JobProvider {
    descriptor: EngineDescriptor,
    store: Arc<dyn ResourceStore>,
}

impl JobProvider {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            descriptor: EngineDescriptor::new("job", "Job"),
            store,
        }
    }
}

#[async_trait]
impl ScriptExecutorProvider for JobProvider {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    async fn create_executor(&self, request: &RequestContext) -> Result<Box<dyn ScriptExecutor>> {
        let path = resolve_resource(self.store.as_ref(), &request.path).await?;
        Ok(Box::new(JobExecutor {
            path,
            store: Arc::clone(&self.store),
        }))
    }
}

struct JobExecutor {
    path: String,
    store: Arc<dyn ResourceStore>,
}

#[async_trait]
impl ScriptExecutor for JobExecutor {
    async fn execute(&mut self, ctx: &ExecutionContext) -> Result<ScriptOutput> {
        if ctx.request().depth >= MAX_JOB_DEPTH {
            return Err(RuntimeError::execution(format!(
                "job nesting deeper than {MAX_JOB_DEPTH} at {}",
                self.path
            )));
        }
        let dispatcher = ctx
            .dispatcher()
            .ok_or_else(|| RuntimeError::execution("job engine requires a dispatcher"))?;

        let resource = self.store.read(&self.path).await?;
        let job = JobDefinition::parse(&self.path, &resource.text())?;
        info!(job = %job.name, path = %self.path, steps = job.steps.len(), "Running job");

        let start = Instant::now();
        let mut output = ScriptOutput::default();
        for step in &job.steps {
            let mut request = ctx.request().child(&step.engine, &step.path);
            request.params = ctx.params().clone();
            request.params.extend(step.params.clone());

            debug!(job = %job.name, step = %step.name, engine = %step.engine, "Dispatching step");
            // The step's own error reaches the caller; the log names the step.
            let step_output = match dispatcher.dispatch(request).await {
                Ok(step_output) => step_output,
                Err(e) => {
                    warn!(job = %job.name, step = %step.name, error = %e, "Job step failed");
                    return Err(e);
                }
            };
            output.stdout.push_str(&step_output.stdout);
            output.stderr.push_str(&step_output.stderr);
            output.warnings.push_str(&step_output.warnings);
        }
        output.elapsed = start.elapsed();
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Dispatch;
    use crate::resource::MemoryResourceStore;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Records dispatched requests; fails any path containing `fail` or `slow`.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<RequestContext>>,
    }

    #[async_trait]
    impl Dispatch for Recorder {
        async fn dispatch(&self, request: RequestContext) -> Result<ScriptOutput> {
            self.seen.lock().push(request.clone());
            if request.path.contains("fail") {
                return Err(RuntimeError::execution("boom"));
            }
            if request.path.contains("slow") {
                return Err(RuntimeError::ProcessTimeout(Duration::from_secs(1)));
            }
            Ok(ScriptOutput::text(format!("[{}]", request.path)))
        }
    }

    const JOB: &str = r#"
name = "nightly"

[[steps]]
name = "first"
engine = "js"
path = "/a.js"

[[steps]]
name = "second"
engine = "command"
path = "/b.json"
params = { mode = "fast" }
"#;

    async fn run_job(content: &str, recorder: Arc<Recorder>, depth: u32) -> Result<ScriptOutput> {
        let store = Arc::new(MemoryResourceStore::new());
        store.write("/flow.toml", content.as_bytes()).await?;
        let provider = JobProvider::new(store);
        let mut request = RequestContext::new("job", "/flow.toml").with_param("who", "me");
        request.depth = depth;
        let mut executor = provider.create_executor(&request).await?;
        let ctx = ExecutionContext::new(request).with_dispatcher(recorder);
        executor.execute(&ctx).await
    }

    #[test]
    fn test_parse() {
        let job = JobDefinition::parse("/flow.toml", JOB).unwrap();
        assert_eq!(job.name, "nightly");
        assert_eq!(job.steps.len(), 2);
        assert_eq!(job.steps[1].params["mode"], "fast");
        assert!(matches!(
            JobDefinition::parse("/flow.toml", "name = \"x\"\nsteps = []"),
            Err(RuntimeError::InvalidDefinition { .. })
        ));
    }

    #[tokio::test]
    async fn test_steps_run_in_order_and_concatenate() {
        let recorder = Arc::new(Recorder::default());
        let out = run_job(JOB, recorder.clone(), 0).await.unwrap();
        assert_eq!(out.stdout, "[/a.js][/b.json]");

        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].engine, "js");
        assert_eq!(seen[0].depth, 1);
        assert_eq!(seen[0].params["who"], "me");
        assert_eq!(seen[1].params["mode"], "fast");
    }

    #[tokio::test]
    async fn test_first_failure_stops_job() {
        let job = r#"
name = "broken"

[[steps]]
name = "bad"
engine = "js"
path = "/fail.js"

[[steps]]
name = "never"
engine = "js"
path = "/never.js"
"#;
        let recorder = Arc::new(Recorder::default());
        let err = run_job(job, recorder.clone(), 0).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Execution(ref m) if m == "boom"));
        assert_eq!(recorder.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_step_error_keeps_its_type() {
        let job = r#"
name = "waits"

[[steps]]
name = "ok"
engine = "js"
path = "/a.js"

[[steps]]
name = "stuck"
engine = "command"
path = "/slow.json"
"#;
        let recorder = Arc::new(Recorder::default());
        let err = run_job(job, recorder.clone(), 0).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ProcessTimeout(d) if d == Duration::from_secs(1)));
        assert_eq!(recorder.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_depth_limit() {
        let recorder = Arc::new(Recorder::default());
        let err = run_job(JOB, recorder.clone(), MAX_JOB_DEPTH).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Execution(ref m) if m.contains("nesting")));
        assert!(recorder.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_requires_dispatcher() {
        let store = Arc::new(MemoryResourceStore::new());
        store.write("/flow.toml", JOB.as_bytes()).await.unwrap();
        let provider = JobProvider::new(store);
        let request = RequestContext::new("job", "/flow.toml");
        let mut executor = provider.create_executor(&request).await.unwrap();
        let err = executor
            .execute(&ExecutionContext::new(request))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Execution(ref m) if m.contains("dispatcher")));
    }
}
