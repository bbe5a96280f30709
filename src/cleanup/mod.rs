// Shutdown coordinator
// Collects cleanup obligations during the application's lifetime and
// discharges them once, critical work first, when the process goes down

pub mod error;
pub mod stats;
pub mod task;
pub mod temp;
pub mod tracker;

pub use error::{CleanupError, Result};
pub use stats::{CleanupStats, StatsSnapshot};
pub use task::{CleanupTask, Priority, TaskOutcome, TaskReport};
pub use temp::{TempLedger, TempWorkspace};
pub use tracker::ResourceTracker;

use crate::config::ShutdownConfig;
use parking_lot::{Condvar, Mutex, ReentrantMutex};
use serde::Serialize;
use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use task::TaskRegistry;
use tracing::{debug, error, info, instrument};

/// Timeout applied by [`CleanupManager::register_default_task`] unless configured
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(5);

/// Summary of one shutdown pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    pub tasks: TaskReport,
    pub resources_cleaned: usize,
    pub temp_files_cleaned: usize,
    pub temp_dirs_cleaned: usize,
    /// Tracker entries whose resources were already gone
    pub reclaimed: usize,
    pub elapsed: Duration,
}

struct ManagerState {
    tasks: TaskRegistry,
    temp: TempLedger,
}

/// Shutdown coordinator.
///
/// One instance per process, constructed by the entry point and shared as
/// `Arc<CleanupManager>`. Every registration method is safe to call from any
/// thread, including from inside a cleanup callback.
///
/// ```text
/// cleanup_all()
///   ├─► latch (first caller only)
///   ├─► 1. tasks, critical → low, each under its timeout
///   ├─► 2. tracked resources
///   ├─► 3. temp files, then temp directories
///   └─► 4. sweep dropped tracker entries
/// ```
pub struct CleanupManager {
    state: ReentrantMutex<RefCell<ManagerState>>,
    tracker: ResourceTracker,
    stats: CleanupStats,
    shutdown_started: AtomicBool,
    /// Set once a shutdown pass has run to the end
    pass_finished: Mutex<bool>,
    pass_finished_cv: Condvar,
    hooks_installed: AtomicBool,
    default_timeout: Duration,
}

impl CleanupManager {
    pub fn new() -> Self {
        Self::with_default_timeout(DEFAULT_TASK_TIMEOUT)
    }

    pub fn with_default_timeout(default_timeout: Duration) -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(ManagerState {
                tasks: TaskRegistry::new(),
                temp: TempLedger::new(),
            })),
            tracker: ResourceTracker::new(),
            stats: CleanupStats::new(),
            shutdown_started: AtomicBool::new(false),
            pass_finished: Mutex::new(false),
            pass_finished_cv: Condvar::new(),
            hooks_installed: AtomicBool::new(false),
            default_timeout,
        }
    }

    pub fn from_config(config: &ShutdownConfig) -> Self {
        Self::with_default_timeout(task::timeout_from_secs(config.default_timeout_secs))
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    // ---- tasks ----

    /// Register a cleanup task. Duplicate names are accepted.
    /// A zero `timeout` runs the task inline with no deadline.
    pub fn register_task<F>(&self, name: impl Into<String>, priority: Priority, timeout: Duration, action: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let task = CleanupTask::new(name, priority, timeout, action);
        debug!(task = %task.name(), priority = %priority, timeout_ms = timeout.as_millis() as u64, "Registered cleanup task");

        let guard = self.state.lock();
        guard.borrow_mut().tasks.push(task);
    }

    /// Register a normal-priority task with the default timeout
    pub fn register_default_task<F>(&self, name: impl Into<String>, action: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_task(name, Priority::Normal, self.default_timeout, action);
    }

    pub fn task_count(&self) -> usize {
        let guard = self.state.lock();
        let count = guard.borrow().tasks.len();
        count
    }

    /// Run every registered task, critical first, each under its own timeout.
    /// Failures are recorded in the report and never propagated.
    #[instrument(skip(self))]
    pub fn run_tasks(&self) -> TaskReport {
        let tasks = {
            let guard = self.state.lock();
            let ordered = guard.borrow().tasks.ordered();
            ordered
        };

        let report = task::run_tasks(&tasks, true);
        self.record_report(&report);
        report
    }

    fn record_report(&self, report: &TaskReport) {
        for outcome in &report.details {
            self.stats.record_task(outcome.success);
        }
    }

    // ---- tracked resources ----

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    pub fn register_resource<T>(&self, id: impl Into<String>, resource: &Arc<T>, resource_type: impl Into<String>)
    where
        T: Any + Send + Sync,
    {
        self.tracker.register(id, resource, resource_type);
    }

    pub fn register_resource_with_cleanup<T, F>(
        &self,
        id: impl Into<String>,
        resource: &Arc<T>,
        resource_type: impl Into<String>,
        on_cleanup: F,
    ) where
        T: Any + Send + Sync,
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.tracker.register_with_cleanup(id, resource, resource_type, on_cleanup);
    }

    /// Track a resource under a generated id and return the id
    pub fn track_resource<T>(&self, resource: &Arc<T>, resource_type: impl Into<String>) -> String
    where
        T: Any + Send + Sync,
    {
        let id = uuid::Uuid::new_v4().to_string();
        self.tracker.register(id.clone(), resource, resource_type);
        id
    }

    pub fn unregister_resource(&self, id: &str) -> bool {
        self.tracker.unregister(id)
    }

    /// Clean up all tracked resources. Returns the number cleaned successfully.
    pub fn cleanup_resources(&self) -> usize {
        let cleaned = self.tracker.cleanup_all();
        self.stats.add_resources(cleaned);
        cleaned
    }

    pub fn cleanup_resources_of_type(&self, resource_type: &str) -> usize {
        let cleaned = self.tracker.cleanup_of_type(resource_type);
        self.stats.add_resources(cleaned);
        cleaned
    }

    // ---- temp paths ----

    pub fn add_temp_file(&self, path: impl AsRef<Path>) {
        let guard = self.state.lock();
        guard.borrow_mut().temp.add_file(path.as_ref());
    }

    pub fn add_temp_dir(&self, path: impl AsRef<Path>) {
        let guard = self.state.lock();
        guard.borrow_mut().temp.add_dir(path.as_ref());
    }

    pub fn remove_temp_file(&self, path: impl AsRef<Path>) {
        let guard = self.state.lock();
        guard.borrow_mut().temp.remove_file(path.as_ref());
    }

    pub fn remove_temp_dir(&self, path: impl AsRef<Path>) {
        let guard = self.state.lock();
        guard.borrow_mut().temp.remove_dir(path.as_ref());
    }

    pub fn is_temp_file(&self, path: impl AsRef<Path>) -> bool {
        let guard = self.state.lock();
        let found = guard.borrow().temp.contains_file(path.as_ref());
        found
    }

    pub fn is_temp_dir(&self, path: impl AsRef<Path>) -> bool {
        let guard = self.state.lock();
        let found = guard.borrow().temp.contains_dir(path.as_ref());
        found
    }

    /// Delete every registered temp file. Never fails; returns how many were deleted.
    pub fn cleanup_temp_files(&self) -> usize {
        let files = {
            let guard = self.state.lock();
            let files = guard.borrow().temp.files();
            files
        };

        let cleaned = self.drain_paths(&files, temp::delete_file, |ledger, path| {
            ledger.remove_file(path);
        });
        self.stats.add_temp_files(cleaned);
        cleaned
    }

    /// Recursively delete every registered temp directory, nested ones first
    pub fn cleanup_temp_dirs(&self) -> usize {
        let mut dirs = {
            let guard = self.state.lock();
            let dirs = guard.borrow().temp.dirs();
            dirs
        };
        dirs.reverse();

        let cleaned = self.drain_paths(&dirs, temp::delete_dir, |ledger, path| {
            ledger.remove_dir(path);
        });
        self.stats.add_temp_dirs(cleaned);
        cleaned
    }

    fn drain_paths(
        &self,
        paths: &[PathBuf],
        delete: fn(&Path) -> bool,
        forget: impl Fn(&mut TempLedger, &Path),
    ) -> usize {
        let mut cleaned = 0;
        for path in paths {
            if delete(path) {
                cleaned += 1;
            }
            // Forgotten whether or not the delete worked
            let guard = self.state.lock();
            forget(&mut guard.borrow_mut().temp, path);
        }
        cleaned
    }

    // ---- shutdown ----

    pub fn is_shutdown_started(&self) -> bool {
        self.shutdown_started.load(Ordering::SeqCst)
    }

    /// True once a shutdown pass (normal or forced) has run to the end
    pub fn is_cleanup_finished(&self) -> bool {
        *self.pass_finished.lock()
    }

    /// Block until a shutdown pass has run to the end.
    ///
    /// Used by exit paths that lost the race for the latch, so the process
    /// does not go down while another thread is still cleaning up. Must not
    /// be called from inside a cleanup task or callback.
    pub fn wait_for_cleanup(&self) {
        let mut finished = self.pass_finished.lock();
        while !*finished {
            self.pass_finished_cv.wait(&mut finished);
        }
    }

    /// Like [`wait_for_cleanup`](Self::wait_for_cleanup) with a deadline.
    /// Returns whether the pass finished in time.
    pub fn wait_for_cleanup_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut finished = self.pass_finished.lock();
        while !*finished {
            if self.pass_finished_cv.wait_until(&mut finished, deadline).timed_out() {
                return *finished;
            }
        }
        true
    }

    fn finish_pass(&self) {
        *self.pass_finished.lock() = true;
        self.pass_finished_cv.notify_all();
    }

    /// Run the full shutdown pass.
    ///
    /// Only the first call does any work and gets a report; every later call,
    /// from any thread, returns `None` immediately, even while the first pass
    /// is still running. Use [`wait_for_cleanup`](Self::wait_for_cleanup) to
    /// wait for it.
    pub fn cleanup_all(&self) -> Option<ShutdownReport> {
        if self
            .shutdown_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Cleanup already performed, skipping");
            return None;
        }

        info!(
            tasks = self.task_count(),
            "Shutdown started - running cleanup"
        );
        let started = Instant::now();

        let tasks = guarded("tasks", || self.run_tasks());
        let resources_cleaned = guarded("resources", || self.cleanup_resources());
        let temp_files_cleaned = guarded("temp files", || self.cleanup_temp_files());
        let temp_dirs_cleaned = guarded("temp dirs", || self.cleanup_temp_dirs());
        let reclaimed = guarded("sweep", || self.tracker.sweep());

        let report = ShutdownReport {
            tasks,
            resources_cleaned,
            temp_files_cleaned,
            temp_dirs_cleaned,
            reclaimed,
            elapsed: started.elapsed(),
        };

        info!(
            tasks_executed = report.tasks.executed,
            tasks_failed = report.tasks.failed,
            resources_cleaned = report.resources_cleaned,
            temp_files_cleaned = report.temp_files_cleaned,
            temp_dirs_cleaned = report.temp_dirs_cleaned,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Cleanup complete"
        );
        self.finish_pass();

        Some(report)
    }

    /// Emergency shutdown.
    ///
    /// Latches immediately, runs only critical tasks inline with no deadline,
    /// then drains resources and temp paths. Runs even if a normal pass
    /// already happened.
    pub fn force_cleanup(&self) -> ShutdownReport {
        self.shutdown_started.store(true, Ordering::SeqCst);
        info!("Forced cleanup started");
        let started = Instant::now();

        let tasks = guarded("critical tasks", || {
            let critical = {
                let guard = self.state.lock();
                let critical = guard.borrow().tasks.critical();
                critical
            };
            let report = task::run_tasks(&critical, false);
            self.record_report(&report);
            report
        });
        let resources_cleaned = guarded("resources", || self.cleanup_resources());
        let temp_files_cleaned = guarded("temp files", || self.cleanup_temp_files());
        let temp_dirs_cleaned = guarded("temp dirs", || self.cleanup_temp_dirs());
        self.finish_pass();

        ShutdownReport {
            tasks,
            resources_cleaned,
            temp_files_cleaned,
            temp_dirs_cleaned,
            reclaimed: 0,
            elapsed: started.elapsed(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        let tracked_resources = self.tracker.len();
        let guard = self.state.lock();
        let state = guard.borrow();

        StatsSnapshot {
            tasks_executed: self.stats.tasks_executed(),
            tasks_failed: self.stats.tasks_failed(),
            resources_cleaned: self.stats.resources_cleaned(),
            temp_files_cleaned: self.stats.temp_files_cleaned(),
            temp_dirs_cleaned: self.stats.temp_dirs_cleaned(),
            registered_tasks: state.tasks.len(),
            tracked_resources,
            temp_files_pending: state.temp.file_count(),
            temp_dirs_pending: state.temp.dir_count(),
            shutdown_started: self.is_shutdown_started(),
        }
    }

    /// Flip the hooks flag. Returns false if hooks were already installed.
    pub(crate) fn claim_hooks(&self) -> bool {
        !self.hooks_installed.swap(true, Ordering::SeqCst)
    }
}

impl Default for CleanupManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one shutdown step, containing any panic so the next step still runs
fn guarded<T: Default>(step: &str, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            error!(step = step, error = %CleanupError::from_panic(payload), "Cleanup step panicked");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_new_manager_is_idle() {
        let manager = CleanupManager::new();
        let stats = manager.stats();
        assert!(!stats.shutdown_started);
        assert_eq!(stats.registered_tasks, 0);
        assert_eq!(manager.default_timeout(), DEFAULT_TASK_TIMEOUT);
    }

    #[test]
    fn test_from_config_clamps_negative_timeout() {
        let config = ShutdownConfig {
            default_timeout_secs: -1.0,
            ..ShutdownConfig::default()
        };
        let manager = CleanupManager::from_config(&config);
        assert_eq!(manager.default_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_run_tasks_updates_stats() {
        let manager = CleanupManager::new();
        manager.register_default_task("ok", || Ok(()));
        manager.register_task("bad", Priority::High, Duration::ZERO, || anyhow::bail!("nope"));

        let report = manager.run_tasks();
        assert_eq!(report.details[0].name, "bad");
        assert_eq!(manager.stats().tasks_executed, 1);
        assert_eq!(manager.stats().tasks_failed, 1);

        // run_tasks is not latched; counters keep growing
        manager.run_tasks();
        assert_eq!(manager.stats().tasks_executed, 2);
    }

    #[test]
    fn test_cleanup_all_only_once() {
        let manager = CleanupManager::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        manager.register_default_task("count", move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(manager.cleanup_all().is_some());
        assert!(manager.cleanup_all().is_none());
        assert!(manager.cleanup_all().is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(manager.is_shutdown_started());
    }

    #[test]
    fn test_losing_caller_can_wait_for_running_pass() {
        let scratch = tempfile::tempdir().unwrap();
        let file = scratch.path().join("palette.json");
        std::fs::write(&file, b"{}").unwrap();

        let manager = Arc::new(CleanupManager::new());
        manager.register_task("slow-flush", Priority::Critical, Duration::from_secs(2), || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        });
        manager.add_temp_file(&file);

        let runner = manager.clone();
        let pass = std::thread::spawn(move || runner.cleanup_all());
        while !manager.is_shutdown_started() {
            std::thread::yield_now();
        }

        assert!(manager.cleanup_all().is_none());
        assert!(!manager.is_cleanup_finished());
        assert!(!manager.wait_for_cleanup_timeout(Duration::from_millis(10)));

        manager.wait_for_cleanup();
        assert!(manager.is_cleanup_finished());
        assert!(!file.exists());
        assert!(pass.join().unwrap().is_some());
    }

    #[test]
    fn test_force_cleanup_marks_pass_finished() {
        let manager = CleanupManager::new();
        assert!(!manager.wait_for_cleanup_timeout(Duration::from_millis(10)));
        manager.force_cleanup();
        assert!(manager.wait_for_cleanup_timeout(Duration::ZERO));
    }

    #[test]
    fn test_panicking_callback_does_not_stop_later_steps() {
        let scratch = tempfile::tempdir().unwrap();
        let file = scratch.path().join("preview.png");
        std::fs::write(&file, b"png").unwrap();

        let manager = CleanupManager::new();
        let res = Arc::new(());
        manager.register_resource_with_cleanup("explodes", &res, "cache", || panic!("boom"));
        manager.add_temp_file(&file);

        let report = manager.cleanup_all().unwrap();
        assert_eq!(report.resources_cleaned, 0);
        assert_eq!(report.temp_files_cleaned, 1);
        assert!(!file.exists());
    }

    #[test]
    fn test_task_can_register_temp_file_from_worker() {
        let scratch = tempfile::tempdir().unwrap();
        let late = scratch.path().join("late.tmp");
        std::fs::write(&late, b"x").unwrap();

        let manager = Arc::new(CleanupManager::new());
        let inner = manager.clone();
        let late_path = late.clone();
        manager.register_task("adds-temp", Priority::Critical, Duration::from_secs(2), move || {
            inner.add_temp_file(&late_path);
            Ok(())
        });

        let report = manager.cleanup_all().unwrap();
        assert_eq!(report.tasks.executed, 1);
        assert_eq!(report.temp_files_cleaned, 1);
        assert!(!late.exists());
    }

    #[test]
    fn test_force_cleanup_runs_only_critical() {
        let manager = CleanupManager::new();
        let ran = Arc::new(Mutex::new(Vec::new()));
        for (name, priority) in [("c", Priority::Critical), ("h", Priority::High), ("l", Priority::Low)] {
            let ran = ran.clone();
            manager.register_task(name, priority, Duration::from_secs(1), move || {
                ran.lock().push(name);
                Ok(())
            });
        }

        let report = manager.force_cleanup();
        assert_eq!(*ran.lock(), vec!["c"]);
        assert_eq!(report.tasks.executed, 1);
        assert!(manager.is_shutdown_started());
        assert!(manager.cleanup_all().is_none());
    }

    #[test]
    fn test_track_resource_generates_id() {
        let manager = CleanupManager::new();
        let res = Arc::new(42u32);
        let id = manager.track_resource(&res, "counter");
        assert!(manager.tracker().contains(&id));
        assert_eq!(manager.stats().tracked_resources, 1);
        assert!(manager.unregister_resource(&id));
    }

    #[test]
    fn test_claim_hooks_once() {
        let manager = CleanupManager::new();
        assert!(manager.claim_hooks());
        assert!(!manager.claim_hooks());
    }
}
