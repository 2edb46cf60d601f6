//! Execution counters, per engine.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;

/// Counters for one engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCounters {
    pub executions: u64,
    pub failures: u64,
    /// Sum of execution wall-clock time, in milliseconds.
    pub total_ms: u64,
}

/// Point-in-time view of the runtime, as persisted by the metrics task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub captured_at: DateTime<Utc>,
    pub executions: u64,
    pub failures: u64,
    pub engines: BTreeMap<String, EngineCounters>,
    pub cache: CacheStats,
}

/// Execution counters shared by every request.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    engines: Mutex<BTreeMap<String, EngineCounters>>,
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one execution on `engine`.
    pub fn record(&self, engine: &str, ok: bool, elapsed: Duration) {
        let mut engines = self.engines.lock();
        let counters = engines.entry(engine.to_string()).or_default();
        counters.executions += 1;
        if !ok {
            counters.failures += 1;
        }
        counters.total_ms += u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    /// Counters for one engine.
    pub fn engine(&self, engine: &str) -> EngineCounters {
        self.engines.lock().get(engine).copied().unwrap_or_default()
    }

    pub fn snapshot(&self, cache: CacheStats) -> MetricsSnapshot {
        let engines = self.engines.lock().clone();
        MetricsSnapshot {
            captured_at: Utc::now(),
            executions: engines.values().map(|c| c.executions).sum(),
            failures: engines.values().map(|c| c.failures).sum(),
            engines,
            cache,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = RuntimeMetrics::new();
        metrics.record("js", true, Duration::from_millis(5));
        metrics.record("js", false, Duration::from_millis(7));
        metrics.record("java", true, Duration::from_millis(100));

        assert_eq!(
            metrics.engine("js"),
            EngineCounters {
                executions: 2,
                failures: 1,
                total_ms: 12
            }
        );
        assert_eq!(metrics.engine("groovy"), EngineCounters::default());

        let snapshot = metrics.snapshot(CacheStats::default());
        assert_eq!(snapshot.executions, 3);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.engines.len(), 2);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["engines"]["java"]["executions"], 1);
        assert_eq!(json["cache"]["hits"], 0);
    }
}
