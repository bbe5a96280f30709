//! # chroma-cleanup
//!
//! Shutdown coordinator for the Chroma color picker.
//!
//! The application registers cleanup obligations while it runs: prioritized
//! cleanup tasks, tracked resources it does not own, and temporary files and
//! directories. [`CleanupManager`] discharges them exactly once when the
//! process goes down, whether that is a normal return from `main`, a
//! termination signal, or an explicit request.
//!
//! ```text
//!   UI / services                      signals / exit
//!        │ register_task                    │ SIGTERM, SIGINT, ExitGuard drop
//!        │ register_resource                ▼
//!        │ add_temp_file / TempWorkspace  cleanup_all()  (latched, runs once)
//!        ▼                                  │
//! ┌──────────────────────────────┐          │
//! │ CleanupManager               │◄─────────┘
//! │  - TaskRegistry  (priority)  │  1. tasks, critical → low, each with a timeout
//! │  - ResourceTracker (weak)    │  2. tracked resources
//! │  - TempLedger                │  3. temp files, then temp directories
//! │  - CleanupStats              │  4. sweep dropped tracker entries
//! └──────────────────────────────┘
//! ```
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use chroma_cleanup::{install_process_hooks, CleanupManager, Priority, SignalOptions};
//!
//! let manager = Arc::new(CleanupManager::new());
//! manager.register_task("flush-unsaved-palette", Priority::High, Duration::from_secs(2), || {
//!     // write the palette somewhere durable
//!     Ok(())
//! });
//! manager.add_temp_file("/tmp/preview-0001.png");
//!
//! // Cleanup runs on SIGTERM/SIGINT, or when `hooks` is dropped at the end of main
//! let hooks = install_process_hooks(manager.clone(), SignalOptions::default())?;
//! # drop(hooks);
//! # Ok::<(), chroma_cleanup::CleanupError>(())
//! ```

pub mod cleanup;
pub mod config;
pub mod observability;
pub mod signals;

pub use cleanup::{
    CleanupError, CleanupManager, CleanupTask, Priority, ResourceTracker, ShutdownReport,
    StatsSnapshot, TaskOutcome, TaskReport, TempLedger, TempWorkspace,
};
pub use config::CleanupConfig;
pub use signals::{
    install_process_hooks, install_signal_handlers, ExitGuard, ShutdownHooks, ShutdownSignal,
    SignalOptions, SignalWatcher,
};
