//! Interpreted JavaScript engines (`js`, `js-debug`).
//!
//! Content is re-read on every call and piped to the interpreter's stdin,
//! so there is nothing to cache.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scriptor_config::InterpreterSection;

use crate::context::{ExecutionContext, RequestContext};
use crate::debug::{InspectorBridge, attach};
use crate::error::{Result, RuntimeError};
use crate::executor::{ScriptExecutor, ScriptOutput};
use crate::process::{EnvironmentPatch, Invocation, ProcessRunner};
use crate::provider::{EngineDescriptor, ScriptExecutorProvider, resolve_resource};
use crate::resource::ResourceStore;

/// Provider for interpreted scripts, optionally debug-capable.
pub struct InterpretedProvider {
    descriptor: EngineDescriptor,
    store: Arc<dyn ResourceStore>,
    interpreter: Vec<String>,
    runner: ProcessRunner,
    bridge: Option<InspectorBridge>,
}

impl InterpretedProvider {
    /// The `js` engine.
    pub fn js(
        store: Arc<dyn ResourceStore>,
        settings: &InterpreterSection,
        run_timeout: Duration,
    ) -> Self {
        Self {
            descriptor: EngineDescriptor::new("js", "JavaScript"),
            store,
            interpreter: settings.interpreter.clone(),
            runner: ProcessRunner::with_timeout(run_timeout),
            bridge: None,
        }
    }

    /// The `js-debug` engine. Debug sessions keep their scripts under `work_dir`.
    pub fn js_debug(
        store: Arc<dyn ResourceStore>,
        settings: &InterpreterSection,
        work_dir: impl Into<PathBuf>,
        run_timeout: Duration,
    ) -> Self {
        Self {
            descriptor: EngineDescriptor::new("js-debug", "JavaScript (debug)"),
            store,
            interpreter: settings.interpreter.clone(),
            runner: ProcessRunner::with_timeout(run_timeout),
            bridge: Some(InspectorBridge::new(
                settings.debug.clone(),
                work_dir,
                run_timeout,
            )),
        }
    }
}

#[async_trait]
impl ScriptExecutorProvider for InterpretedProvider {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    async fn create_executor(&self, request: &RequestContext) -> Result<Box<dyn ScriptExecutor>> {
        let path = resolve_resource(self.store.as_ref(), &request.path).await?;
        Ok(Box::new(InterpretedExecutor {
            path,
            store: Arc::clone(&self.store),
            interpreter: self.interpreter.clone(),
            runner: self.runner,
            bridge: self.bridge.clone(),
        }))
    }
}

struct InterpretedExecutor {
    path: String,
    store: Arc<dyn ResourceStore>,
    interpreter: Vec<String>,
    runner: ProcessRunner,
    bridge: Option<InspectorBridge>,
}

#[async_trait]
impl ScriptExecutor for InterpretedExecutor {
    async fn execute(&mut self, ctx: &ExecutionContext) -> Result<ScriptOutput> {
        let resource = self.store.read(&self.path).await?;
        let env = EnvironmentPatch::set_all(ctx.process_env());

        if let Some(ref bridge) = self.bridge {
            if let Some(session) = attach(ctx.request()) {
                return bridge.run(session, &resource, env).await;
            }
        }

        let invocation = Invocation::new(self.interpreter.clone())
            .with_env(env)
            .with_stdin(resource.content);
        let output = self.runner.run(&invocation).await?;
        if !output.success() {
            return Err(RuntimeError::execution(format!(
                "{} exited with code {}: {}",
                self.path,
                output.exit_code,
                output.stderr.trim_end()
            )));
        }
        Ok(ScriptOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            elapsed: output.elapsed,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::DebugOptions;
    use crate::process::program_available;
    use crate::resource::MemoryResourceStore;

    fn sh_settings() -> InterpreterSection {
        InterpreterSection {
            interpreter: vec!["sh".into(), "-s".into()],
            debug: vec!["definitely-not-a-real-debugger-4711".into()],
        }
    }

    #[tokio::test]
    async fn test_reads_content_on_every_call() {
        if !program_available("sh") {
            eprintln!("Skipping: sh not available");
            return;
        }
        let store = Arc::new(MemoryResourceStore::new());
        store.write("/greet.sh", b"echo \"one $SCRIPTOR_PARAM_NAME\"").await.unwrap();
        let provider =
            InterpretedProvider::js(store.clone(), &sh_settings(), Duration::from_secs(10));

        let request = RequestContext::new("js", "/greet.sh").with_param("name", "ada");
        let mut executor = provider.create_executor(&request).await.unwrap();
        let ctx = ExecutionContext::new(request);
        assert_eq!(executor.execute(&ctx).await.unwrap().stdout, "one ada\n");

        store.write("/greet.sh", b"echo two").await.unwrap();
        assert_eq!(executor.execute(&ctx).await.unwrap().stdout, "two\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_execution_error() {
        if !program_available("sh") {
            eprintln!("Skipping: sh not available");
            return;
        }
        let store = Arc::new(MemoryResourceStore::new());
        store.write("/fail.sh", b"echo bad >&2; exit 2").await.unwrap();
        let provider = InterpretedProvider::js(store, &sh_settings(), Duration::from_secs(10));
        let request = RequestContext::new("js", "/fail.sh");
        let mut executor = provider.create_executor(&request).await.unwrap();
        let err = executor
            .execute(&ExecutionContext::new(request))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Execution(ref m) if m.contains("code 2") && m.contains("bad")
        ));
    }

    #[tokio::test]
    async fn test_debug_engine_without_debug_options_runs_plainly() {
        if !program_available("sh") {
            eprintln!("Skipping: sh not available");
            return;
        }
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(MemoryResourceStore::new());
        store.write("/plain.sh", b"echo plain").await.unwrap();
        let provider = InterpretedProvider::js_debug(
            store,
            &sh_settings(),
            dir.path(),
            Duration::from_secs(10),
        );
        assert_eq!(provider.engine_type(), "js-debug");

        let request = RequestContext::new("js-debug", "/plain.sh");
        let mut executor = provider.create_executor(&request).await.unwrap();
        let out = executor
            .execute(&ExecutionContext::new(request))
            .await
            .unwrap();
        assert_eq!(out.stdout, "plain\n");
    }

    #[tokio::test]
    async fn test_debug_request_goes_through_bridge() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(MemoryResourceStore::new());
        store.write("/dbg.js", b"1").await.unwrap();
        let provider = InterpretedProvider::js_debug(
            store,
            &sh_settings(),
            dir.path(),
            Duration::from_secs(10),
        );
        let request =
            RequestContext::new("js-debug", "/dbg.js").with_debug(DebugOptions::new(vec![1]));
        let mut executor = provider.create_executor(&request).await.unwrap();
        let err = executor
            .execute(&ExecutionContext::new(request))
            .await
            .unwrap_err();
        // The bogus debug command proves the bridge was used.
        assert!(matches!(
            err,
            RuntimeError::Debug(ref m) if m.contains("definitely-not-a-real-debugger-4711")
        ));
    }
}
