//! Background task scheduler.
//!
//! Every registered task gets its own tokio task driving a
//! `tokio::time::interval`. A run is awaited before the next tick, so runs of
//! one task never overlap; missed ticks are skipped rather than bunched up.
//! Each run is itself spawned so a panic is caught and recorded like any
//! other failure. Failures never touch other tasks' schedules.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, RuntimeError, TaskError};

/// A unit of background work.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Unique name, used for status and logs.
    fn name(&self) -> &str;

    async fn run(&self) -> std::result::Result<(), TaskError>;
}

/// When a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Every `interval`, first run after `initial_delay`.
    Every {
        interval: Duration,
        initial_delay: Duration,
    },
}

impl Schedule {
    /// Every `interval`, starting immediately.
    pub fn every(interval: Duration) -> Self {
        Self::Every {
            interval,
            initial_delay: Duration::ZERO,
        }
    }

    pub fn with_initial_delay(self, delay: Duration) -> Self {
        match self {
            Self::Every { interval, .. } => Self::Every {
                interval,
                initial_delay: delay,
            },
        }
    }

    fn interval(&self) -> Duration {
        match self {
            Self::Every { interval, .. } => *interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Running,
}

/// Observable status of one scheduled task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub name: String,
    pub state: TaskState,
    pub runs: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub last_run: Option<DateTime<Utc>>,
}

impl TaskStatus {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: TaskState::Idle,
            runs: 0,
            failures: 0,
            last_error: None,
            last_run: None,
        }
    }
}

/// Collects tasks before the scheduler starts.
#[derive(Default)]
pub struct Scheduler {
    entries: Vec<(Arc<dyn Task>, Schedule)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Names must be unique and intervals non-zero.
    pub fn add(&mut self, task: Arc<dyn Task>, schedule: Schedule) -> Result<()> {
        if self.entries.iter().any(|(t, _)| t.name() == task.name()) {
            return Err(RuntimeError::DuplicateTask(task.name().to_string()));
        }
        if schedule.interval().is_zero() {
            return Err(RuntimeError::invalid_definition(
                task.name(),
                "schedule interval must be greater than zero",
            ));
        }
        self.entries.push((task, schedule));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Start every task on its own tokio task.
    pub fn start(self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let mut workers = Vec::with_capacity(self.entries.len());
        let mut statuses = Vec::with_capacity(self.entries.len());

        for (task, schedule) in self.entries {
            let status = Arc::new(Mutex::new(TaskStatus::new(task.name())));
            statuses.push(Arc::clone(&status));
            workers.push(tokio::spawn(drive(task, schedule, status, cancel.clone())));
        }

        info!(tasks = workers.len(), "Scheduler started");
        SchedulerHandle {
            cancel,
            workers,
            statuses,
        }
    }
}

/// Running scheduler.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    statuses: Vec<Arc<Mutex<TaskStatus>>>,
}

impl SchedulerHandle {
    /// Status of every task, in registration order.
    pub fn status(&self) -> Vec<TaskStatus> {
        self.statuses.iter().map(|s| s.lock().clone()).collect()
    }

    /// Status of one task.
    pub fn task_status(&self, name: &str) -> Option<TaskStatus> {
        self.statuses
            .iter()
            .map(|s| s.lock())
            .find(|s| s.name == name)
            .map(|s| s.clone())
    }

    /// Stop scheduling. Runs already in flight complete first.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Scheduler worker ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

async fn drive(
    task: Arc<dyn Task>,
    schedule: Schedule,
    status: Arc<Mutex<TaskStatus>>,
    cancel: CancellationToken,
) {
    let Schedule::Every {
        interval,
        initial_delay,
    } = schedule;
    let start = tokio::time::Instant::now() + initial_delay;
    let mut ticker = tokio::time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let name = task.name().to_string();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        status.lock().state = TaskState::Running;
        debug!(task = %name, "Task run starting");

        let runner = Arc::clone(&task);
        let outcome = match tokio::spawn(async move { runner.run().await }).await {
            Ok(result) => result,
            Err(join) if join.is_panic() => Err(TaskError::Panicked {
                task: name.clone(),
                message: panic_message(join.into_panic()),
            }),
            Err(join) => Err(TaskError::failed(&name, join)),
        };

        let mut st = status.lock();
        st.state = TaskState::Idle;
        st.runs += 1;
        st.last_run = Some(Utc::now());
        match outcome {
            Ok(()) => {
                debug!(task = %name, runs = st.runs, "Task run finished");
            }
            Err(e) => {
                st.failures += 1;
                st.last_error = Some(e.to_string());
                warn!(task = %name, failures = st.failures, error = %e, "Task run failed");
            }
        }
    }
    debug!(task = %name, "Task schedule cancelled");
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
