// Cleanup statistics
// Counters only ever grow for the lifetime of the coordinator

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic cleanup counters
#[derive(Debug, Default)]
pub struct CleanupStats {
    tasks_executed: AtomicU64,
    tasks_failed: AtomicU64,
    resources_cleaned: AtomicU64,
    temp_files_cleaned: AtomicU64,
    temp_dirs_cleaned: AtomicU64,
}

impl CleanupStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_task(&self, success: bool) {
        if success {
            self.tasks_executed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_resources(&self, count: usize) {
        self.resources_cleaned.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_temp_files(&self, count: usize) {
        self.temp_files_cleaned.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_temp_dirs(&self, count: usize) {
        self.temp_dirs_cleaned.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn tasks_executed(&self) -> u64 {
        self.tasks_executed.load(Ordering::Relaxed)
    }

    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.load(Ordering::Relaxed)
    }

    pub fn resources_cleaned(&self) -> u64 {
        self.resources_cleaned.load(Ordering::Relaxed)
    }

    pub fn temp_files_cleaned(&self) -> u64 {
        self.temp_files_cleaned.load(Ordering::Relaxed)
    }

    pub fn temp_dirs_cleaned(&self) -> u64 {
        self.temp_dirs_cleaned.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of the coordinator for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub tasks_executed: u64,
    pub tasks_failed: u64,
    pub resources_cleaned: u64,
    pub temp_files_cleaned: u64,
    pub temp_dirs_cleaned: u64,
    pub registered_tasks: usize,
    pub tracked_resources: usize,
    pub temp_files_pending: usize,
    pub temp_dirs_pending: usize,
    pub shutdown_started: bool,
}
