// Signal handling and process-exit wiring
// SIGTERM/SIGINT (Ctrl-C/Ctrl-Break on Windows) and normal exit all funnel
// into CleanupManager::cleanup_all, which runs at most once

use crate::cleanup::{CleanupError, CleanupManager, Result, ShutdownReport};
use crate::config::ShutdownConfig;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[cfg(unix)]
use futures::StreamExt;
#[cfg(unix)]
use signal_hook::consts::{SIGINT, SIGTERM};

/// Termination signal that triggered a shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Terminate,
    Interrupt,
    /// Windows console break
    Break,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Break => "Ctrl-Break",
        };
        f.write_str(name)
    }
}

/// Async source of termination signals.
///
/// Must be created inside a tokio runtime. On Unix the actual signal handler
/// only writes to a self-pipe; everything else happens in `recv`.
pub struct ShutdownListener {
    #[cfg(unix)]
    signals: signal_hook_tokio::Signals,
    #[cfg(windows)]
    ctrl_c: Option<tokio::signal::windows::CtrlC>,
    #[cfg(windows)]
    ctrl_break: Option<tokio::signal::windows::CtrlBreak>,
}

impl ShutdownListener {
    #[cfg(unix)]
    pub fn new() -> std::io::Result<Self> {
        let signals = signal_hook_tokio::Signals::new([SIGTERM, SIGINT])?;
        Ok(Self { signals })
    }

    #[cfg(windows)]
    pub fn new() -> std::io::Result<Self> {
        use tokio::signal::windows;

        // Unsupported console events are skipped rather than fatal
        let ctrl_c = windows::ctrl_c()
            .map_err(|e| debug!(error = %e, "Ctrl-C handler unavailable"))
            .ok();
        let ctrl_break = windows::ctrl_break()
            .map_err(|e| debug!(error = %e, "Ctrl-Break handler unavailable"))
            .ok();
        Ok(Self { ctrl_c, ctrl_break })
    }

    /// Wait for the next termination signal. `None` once the source is closed.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> Option<ShutdownSignal> {
        while let Some(signal) = self.signals.next().await {
            match signal {
                SIGTERM => return Some(ShutdownSignal::Terminate),
                SIGINT => return Some(ShutdownSignal::Interrupt),
                _ => debug!("Received unexpected signal: {}", signal),
            }
        }
        None
    }

    /// Wait for the next termination signal. `None` once the source is closed.
    #[cfg(windows)]
    pub async fn recv(&mut self) -> Option<ShutdownSignal> {
        let Self { ctrl_c, ctrl_break } = self;

        let interrupt = async {
            match ctrl_c.as_mut() {
                Some(s) => s.recv().await,
                None => std::future::pending().await,
            }
        };
        let brk = async {
            match ctrl_break.as_mut() {
                Some(s) => s.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            r = interrupt => r.map(|_| ShutdownSignal::Interrupt),
            r = brk => r.map(|_| ShutdownSignal::Break),
        }
    }
}

/// Create a future that resolves when a shutdown signal is received.
/// Must be called from within a tokio runtime.
pub fn create_shutdown_listener() -> anyhow::Result<impl Future<Output = Option<ShutdownSignal>>> {
    let mut listener = ShutdownListener::new()?;

    Ok(async move {
        let signal = listener.recv().await;
        if let Some(signal) = signal {
            info!("Received {} - graceful shutdown initiated", signal);
        }
        signal
    })
}

/// How the signal watcher behaves after cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalOptions {
    /// Exit the process with status 0 once cleanup has run
    pub exit_process: bool,
}

impl Default for SignalOptions {
    fn default() -> Self {
        Self { exit_process: true }
    }
}

impl SignalOptions {
    pub fn from_config(config: &ShutdownConfig) -> Self {
        Self {
            exit_process: config.exit_on_signal,
        }
    }
}

/// Background thread that runs cleanup when a termination signal arrives.
///
/// Dropping the watcher stops it without running cleanup.
pub struct SignalWatcher {
    close_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<Option<ShutdownReport>>>,
}

impl SignalWatcher {
    fn inactive() -> Self {
        Self {
            close_tx: None,
            thread: None,
        }
    }

    /// False when signal registration failed on this platform
    pub fn is_active(&self) -> bool {
        self.thread.is_some()
    }

    /// Wait until the watcher has handled a signal or been closed.
    ///
    /// Returns the report when this watcher's signal ran the shutdown pass.
    pub fn join(mut self) -> Option<ShutdownReport> {
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(report) => report,
            Err(payload) => {
                warn!(error = %CleanupError::from_panic(payload), "Signal watcher panicked");
                None
            }
        }
    }

    /// Stop watching. Cleanup is not run.
    pub fn close(mut self) {
        self.stop();
        let _ = self.join();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Intercept termination signals and run `manager.cleanup_all()` when one arrives.
///
/// Handlers are registered before this returns. If the platform refuses the
/// registration the returned watcher is inactive and the error is only logged.
pub fn install_signal_handlers(manager: Arc<CleanupManager>, options: SignalOptions) -> Result<SignalWatcher> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let listener = {
        let _enter = runtime.enter();
        ShutdownListener::new()
    };
    let mut listener = match listener {
        Ok(listener) => listener,
        Err(e) => {
            debug!(error = %e, "Signal handlers not available, continuing without them");
            return Ok(SignalWatcher::inactive());
        }
    };

    let (close_tx, close_rx) = oneshot::channel::<()>();

    let thread = std::thread::Builder::new()
        .name("cleanup-signals".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let signal = tokio::select! {
                    _ = close_rx => None,
                    signal = listener.recv() => signal,
                };

                let Some(signal) = signal else {
                    debug!("Signal watcher closed");
                    return None;
                };

                info!(signal = %signal, "Received {} - running cleanup", signal);
                let report = manager.cleanup_all();
                if report.is_none() {
                    // Another thread holds the latch; do not exit under it
                    debug!("Cleanup already running elsewhere, waiting for it to finish");
                    manager.wait_for_cleanup();
                }

                if options.exit_process {
                    info!("Cleanup finished, exiting");
                    std::process::exit(0);
                }
                report
            })
        })
        .map_err(CleanupError::Spawn)?;

    info!("Signal handlers installed");
    Ok(SignalWatcher {
        close_tx: Some(close_tx),
        thread: Some(thread),
    })
}

/// Runs `cleanup_all` when dropped.
///
/// Hold one in `main` so cleanup also happens on a normal return or while
/// unwinding from a panic.
pub struct ExitGuard {
    manager: Arc<CleanupManager>,
}

impl ExitGuard {
    pub fn new(manager: Arc<CleanupManager>) -> Self {
        Self { manager }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if self.manager.cleanup_all().is_none() {
            debug!("Exit guard found cleanup already started");
            self.manager.wait_for_cleanup();
        }
    }
}

/// Exit guard plus signal watcher for one coordinator
pub struct ShutdownHooks {
    // Declaration order matters: the watcher stops before the guard runs cleanup
    watcher: SignalWatcher,
    _exit_guard: ExitGuard,
}

impl ShutdownHooks {
    pub fn signals_active(&self) -> bool {
        self.watcher.is_active()
    }

    /// Block until a signal has been handled, then release the exit guard.
    /// Returns immediately when no signal handlers could be installed.
    ///
    /// The report is `Some` when the signal ran the shutdown pass, which
    /// requires `exit_process: false`.
    pub fn wait(self) -> Option<ShutdownReport> {
        let ShutdownHooks { watcher, _exit_guard } = self;
        watcher.join()
    }
}

/// Wire the coordinator into process exit: an exit guard and, when possible,
/// signal handlers. Only one set of hooks may be installed per coordinator.
pub fn install_process_hooks(manager: Arc<CleanupManager>, options: SignalOptions) -> Result<ShutdownHooks> {
    if !manager.claim_hooks() {
        warn!("Process hooks already installed for this coordinator");
        return Err(CleanupError::HooksAlreadyInstalled);
    }

    let watcher = install_signal_handlers(manager.clone(), options)?;
    Ok(ShutdownHooks {
        watcher,
        _exit_guard: ExitGuard::new(manager),
    })
}
