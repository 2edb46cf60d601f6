//! Scheduled tasks provided by the runtime.

use async_trait::async_trait;
use tracing::debug;

use crate::context::RequestContext;
use crate::error::TaskError;
use crate::runtime::Runtime;
use crate::scheduler::Task;

/// Storage prefix for metrics records.
pub const METRICS_PREFIX: &str = "/metrics";

/// Persists a runtime metrics snapshot on every run.
///
/// Records are stored as JSON under `/metrics/<timestamp>`; timestamps sort
/// lexicographically, so the oldest records are pruned first once more than
/// `retention` exist.
pub struct MetricsCaptureTask {
    runtime: Runtime,
    retention: usize,
}

impl MetricsCaptureTask {
    pub fn new(runtime: Runtime, retention: usize) -> Self {
        Self { runtime, retention }
    }
}

#[async_trait]
impl Task for MetricsCaptureTask {
    fn name(&self) -> &str {
        "metrics-capture"
    }

    async fn run(&self) -> Result<(), TaskError> {
        let snapshot = self.runtime.metrics_snapshot();
        let body = serde_json::to_vec(&snapshot).map_err(|e| TaskError::failed(self.name(), e))?;
        let path = format!(
            "{METRICS_PREFIX}/{}",
            snapshot.captured_at.format("%Y%m%dT%H%M%S%.6fZ")
        );

        let storage = self.runtime.storage();
        storage
            .put(&path, &body)
            .map_err(|e| TaskError::failed(self.name(), e))?;

        let records = storage
            .list(METRICS_PREFIX)
            .map_err(|e| TaskError::failed(self.name(), e))?;
        let excess = records.len().saturating_sub(self.retention);
        for record in records.iter().take(excess) {
            storage
                .delete(&record.path)
                .map_err(|e| TaskError::failed(self.name(), e))?;
        }
        debug!(path = %path, pruned = excess, "Metrics captured");
        Ok(())
    }
}

/// Runs a job resource through the runtime.
pub struct JobTask {
    name: String,
    path: String,
    runtime: Runtime,
}

impl JobTask {
    pub fn new(runtime: Runtime, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: format!("job:{path}"),
            path,
            runtime,
        }
    }
}

#[async_trait]
impl Task for JobTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<(), TaskError> {
        self.runtime
            .execute(RequestContext::new("job", self.path.clone()))
            .await
            .map(|_| ())
            .map_err(|e| TaskError::failed(&self.name, e))
    }
}
