//! Request and execution contexts.
//!
//! A [`RequestContext`] is what a caller submits: engine token, resource
//! path, parameters, extra environment and optional debug options. The
//! runtime wraps it in an [`ExecutionContext`] for one invocation; contexts
//! are never shared between invocations.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::debug::DebugOptions;
use crate::error::Result;
use crate::executor::ScriptOutput;

/// Environment variable carrying the resource path into script processes.
pub const ENV_SCRIPT_PATH: &str = "SCRIPTOR_PATH";

/// Environment variable carrying the request id into script processes.
pub const ENV_REQUEST_ID: &str = "SCRIPTOR_REQUEST_ID";

/// Prefix for request parameters exported to script processes.
pub const ENV_PARAM_PREFIX: &str = "SCRIPTOR_PARAM_";

/// A request to run one script resource on one engine.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Engine type or alias.
    pub engine: String,
    /// Resource path.
    pub path: String,
    /// Request parameters.
    pub params: BTreeMap<String, String>,
    /// Extra environment variables for processes started by the script.
    pub environment: BTreeMap<String, String>,
    /// Debug options; only honoured by debug-capable engines.
    pub debug: Option<DebugOptions>,
    /// Unique id for log correlation.
    pub request_id: Uuid,
    /// Nesting depth (jobs dispatching further requests).
    pub depth: u32,
}

impl RequestContext {
    /// Create a request for `path` on `engine`.
    pub fn new(engine: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            path: path.into(),
            params: BTreeMap::new(),
            environment: BTreeMap::new(),
            debug: None,
            request_id: Uuid::new_v4(),
            depth: 0,
        }
    }

    /// Add a request parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Request a debug session.
    pub fn with_debug(mut self, debug: DebugOptions) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Derive a request nested one level below this one.
    pub fn child(&self, engine: impl Into<String>, path: impl Into<String>) -> Self {
        let mut child = Self::new(engine, path);
        child.environment = self.environment.clone();
        child.depth = self.depth + 1;
        child
    }
}

/// Dispatches nested requests back through the engine registry.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Run a request end to end.
    async fn dispatch(&self, request: RequestContext) -> Result<ScriptOutput>;
}

/// Per-invocation context handed to an executor.
pub struct ExecutionContext {
    request: RequestContext,
    dispatcher: Option<Arc<dyn Dispatch>>,
}

impl ExecutionContext {
    /// Wrap a request for one invocation.
    pub fn new(request: RequestContext) -> Self {
        Self {
            request,
            dispatcher: None,
        }
    }

    /// Attach the dispatcher used for nested requests.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatch>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// The originating request.
    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    /// Resource path.
    pub fn path(&self) -> &str {
        &self.request.path
    }

    /// Request parameters.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.request.params
    }

    /// Caller-supplied environment.
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.request.environment
    }

    /// Dispatcher for nested requests, if the runtime provided one.
    pub fn dispatcher(&self) -> Option<&Arc<dyn Dispatch>> {
        self.dispatcher.as_ref()
    }

    /// Variables exported to script processes on top of the inherited
    /// environment: the caller's environment, the resource path, the
    /// request id and each parameter as `SCRIPTOR_PARAM_<KEY>`.
    pub fn process_env(&self) -> BTreeMap<String, String> {
        let mut env = self.request.environment.clone();
        env.insert(ENV_SCRIPT_PATH.to_string(), self.request.path.clone());
        env.insert(
            ENV_REQUEST_ID.to_string(),
            self.request.request_id.to_string(),
        );
        for (key, value) in &self.request.params {
            env.insert(param_env_name(key), value.clone());
        }
        env
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("request", &self.request)
            .field("dispatcher", &self.dispatcher.is_some())
            .finish()
    }
}

/// Environment variable name for a request parameter.
///
/// Upper-cases the key and replaces anything outside `[A-Z0-9_]` with `_`.
pub fn param_env_name(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| {
            let c = c.to_ascii_uppercase();
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{ENV_PARAM_PREFIX}{sanitized}")
}
