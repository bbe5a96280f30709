// Cleanup task registry and timeout-bounded execution
// Tasks run critical-first; a failing or hung task never stops the ones after it

use super::error::{CleanupError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Execution order for cleanup work. Lower values run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// File handles, locks, connections
    Critical = 1,
    /// Data integrity: unsaved palettes, caches
    High = 2,
    /// Temporary files, UI resources
    Normal = 3,
    /// Logs, statistics
    Low = 4,
}

impl Priority {
    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown cleanup priority: {other}")),
        }
    }
}

/// Convert a configured timeout in seconds. Non-positive or NaN means unbounded.
pub fn timeout_from_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Zero-argument cleanup action. Arguments are captured by the closure.
pub type TaskAction = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// A named, prioritized cleanup action with an execution budget
#[derive(Clone)]
pub struct CleanupTask {
    name: String,
    action: TaskAction,
    priority: Priority,
    timeout: Duration,
    created_at: DateTime<Utc>,
}

impl CleanupTask {
    pub fn new<F>(name: impl Into<String>, priority: Priority, timeout: Duration, action: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            action: Arc::new(action),
            priority,
            timeout,
            created_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Zero means the task runs without a deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Run the action on the current thread. Errors and panics become `Err`.
    pub fn execute(&self) -> Result<()> {
        match catch_unwind(AssertUnwindSafe(|| (self.action)())) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CleanupError::Task(format!("{e:#}"))),
            Err(payload) => Err(CleanupError::from_panic(payload)),
        }
    }
}

impl fmt::Debug for CleanupTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupTask")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Run a task under its timeout.
///
/// Bounded tasks run on a detached worker thread; once the deadline passes the
/// caller moves on and whatever the worker reports later is dropped.
pub fn execute_with_timeout(task: &CleanupTask) -> Result<()> {
    if task.timeout.is_zero() {
        return task.execute();
    }

    let (tx, rx) = mpsc::sync_channel(1);
    let worker = task.clone();
    let thread_name = format!("cleanup-{}", task.name.replace('\0', ""));

    std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            // Receiver is gone if we already timed out
            let _ = tx.send(worker.execute());
        })
        .map_err(CleanupError::Spawn)?;

    match rx.recv_timeout(task.timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(CleanupError::TimedOut(task.timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(CleanupError::Panicked(
            "worker exited without reporting".to_string(),
        )),
    }
}

/// Outcome of a single task execution
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub name: String,
    pub priority: Priority,
    pub success: bool,
    pub timed_out: bool,
    pub execution_time: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of a task run
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskReport {
    pub executed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub details: Vec<TaskOutcome>,
}

impl TaskReport {
    fn record(&mut self, outcome: TaskOutcome) {
        if outcome.success {
            self.executed += 1;
        } else {
            self.failed += 1;
        }
        self.details.push(outcome);
    }
}

/// Ordered list of registered tasks
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<CleanupTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task. Duplicate names are allowed.
    pub fn push(&mut self, task: CleanupTask) {
        self.tasks.push(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in execution order: critical first, registration order within a priority
    pub fn ordered(&self) -> Vec<CleanupTask> {
        let mut tasks = self.tasks.clone();
        // sort_by_key is stable
        tasks.sort_by_key(|t| t.priority);
        tasks
    }

    pub fn critical(&self) -> Vec<CleanupTask> {
        self.tasks
            .iter()
            .filter(|t| t.priority == Priority::Critical)
            .cloned()
            .collect()
    }
}

/// Execute tasks in the given order, recording each outcome independently.
///
/// With `bounded` set every task runs under its own timeout; otherwise tasks
/// are called directly with no deadline.
pub fn run_tasks(tasks: &[CleanupTask], bounded: bool) -> TaskReport {
    let mut report = TaskReport::default();

    for task in tasks {
        debug!(task = %task.name, priority = %task.priority, "Running cleanup task");
        let started = Instant::now();

        let result = if bounded {
            execute_with_timeout(task)
        } else {
            task.execute()
        };
        let execution_time = started.elapsed();

        let outcome = match result {
            Ok(()) => TaskOutcome {
                name: task.name.clone(),
                priority: task.priority,
                success: true,
                timed_out: false,
                execution_time,
                error: None,
            },
            Err(e) => {
                warn!(
                    task = %task.name,
                    priority = %task.priority,
                    error = %e,
                    elapsed_ms = execution_time.as_millis() as u64,
                    "Cleanup task failed"
                );
                TaskOutcome {
                    name: task.name.clone(),
                    priority: task.priority,
                    success: false,
                    timed_out: matches!(e, CleanupError::TimedOut(_)),
                    execution_time,
                    error: Some(e.to_string()),
                }
            }
        };

        report.record(outcome);
    }

    report
}
