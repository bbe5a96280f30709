// CLI Command Implementations
// Handles execution of each CLI command with colored output

use super::{info, success, warning, Commands, OutputFormat};
use anyhow::{Context, Result};
use chroma_cleanup::cleanup::{CleanupManager, Priority, ShutdownReport, StatsSnapshot, TempWorkspace};
use chroma_cleanup::config::CleanupConfig;
use chroma_cleanup::observability;
use chroma_cleanup::signals::{self, ExitGuard, SignalOptions};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info as log_info, warn};

/// Bytes written into each placeholder preview
const PREVIEW_PLACEHOLDER: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Execute a CLI command
pub async fn execute(command: Commands) -> Result<()> {
    match command {
        Commands::Run { config: path, once, force, previews, palette_out, format } => {
            let config = CleanupConfig::load(&path)?;
            observability::init(&config.logging)?;
            if std::path::Path::new(&path).exists() {
                log_info!(path = %path, "Configuration loaded");
            } else {
                warn!(path = %path, "Configuration file not found, using defaults");
            }
            let options = SessionOptions {
                once,
                force,
                previews,
                palette_out: palette_out.map(PathBuf::from),
                format,
            };
            run_command(config, options).await
        }
        Commands::Validate { file } => validate_command(file),
        Commands::ShowConfig { file } => show_config_command(file),
    }
}

struct SessionOptions {
    once: bool,
    force: bool,
    previews: usize,
    palette_out: Option<PathBuf>,
    format: OutputFormat,
}

/// Thumbnails kept around while the session is alive
struct PreviewCache {
    entries: Mutex<Vec<PathBuf>>,
}

/// Run a demo picker session: temp previews, a dirty palette, an open file
/// handle, all registered with the coordinator.
async fn run_command(config: CleanupConfig, options: SessionOptions) -> Result<()> {
    let manager = Arc::new(CleanupManager::from_config(&config.shutdown));
    // Temp paths are removed even if setup fails halfway
    let _exit_guard = ExitGuard::new(manager.clone());
    let workspace = TempWorkspace::from_config(manager.clone(), &config.temp);

    // Previews
    let previews_dir = workspace
        .create_temp_dir("previews_", "")
        .context("Failed to create preview directory")?;
    let cache = Arc::new(PreviewCache {
        entries: Mutex::new(Vec::new()),
    });
    for i in 0..options.previews {
        let path = workspace.create_temp_file_in(&previews_dir, &format!("thumb_{i:03}_"), ".png")?;
        std::fs::write(&path, PREVIEW_PLACEHOLDER)
            .with_context(|| format!("Failed to write preview {}", path.display()))?;
        cache.entries.lock().push(path);
    }

    let weak_cache: Weak<PreviewCache> = Arc::downgrade(&cache);
    manager.register_resource_with_cleanup("preview-cache", &cache, "cache", move || {
        if let Some(cache) = weak_cache.upgrade() {
            let dropped = std::mem::take(&mut *cache.entries.lock());
            debug!(entries = dropped.len(), "Preview cache cleared");
        }
        Ok(())
    });

    // An open handle that must be released before anything else
    let lock_path = workspace.create_temp_file("session_", ".lock")?;
    let handle = Arc::new(Mutex::new(Some(
        File::open(&lock_path).context("Failed to open session lock")?,
    )));
    let held = handle.clone();
    manager.register_task("release-file-handles", Priority::Critical, Duration::ZERO, move || {
        if held.lock().take().is_some() {
            debug!("Session lock handle closed");
        }
        Ok(())
    });

    // The unsaved palette
    let palette = vec!["#1e1e2e", "#f38ba8", "#a6e3a1", "#89b4fa", "#f9e2af"];
    let palette_out = options.palette_out.clone();
    manager.register_task(
        "flush-unsaved-palette",
        Priority::High,
        manager.default_timeout(),
        move || {
            let Some(path) = palette_out.as_ref() else {
                debug!("No palette output configured, nothing to flush");
                return Ok(());
            };
            let body = serde_json::to_string_pretty(&palette)?;
            std::fs::write(path, body)
                .with_context(|| format!("Failed to write palette to {}", path.display()))?;
            log_info!(path = %path.display(), "Palette flushed");
            Ok(())
        },
    );

    let stats_source = Arc::downgrade(&manager);
    manager.register_default_task("log-session-stats", move || {
        if let Some(manager) = stats_source.upgrade() {
            let stats = manager.stats();
            log_info!(
                temp_files_pending = stats.temp_files_pending,
                temp_dirs_pending = stats.temp_dirs_pending,
                "Session statistics"
            );
        }
        Ok(())
    });

    success(&format!(
        "Session ready: {} previews in {}",
        options.previews,
        previews_dir.display().to_string().bright_white()
    ));

    if options.once {
        let report = run_cleanup(&manager, options.force)?;
        drop(cache);
        return print_report(report.as_ref(), &manager.stats(), options.format);
    }

    if config.shutdown.install_signal_handlers && !options.force {
        // The watcher must not exit the process: the report is printed here first
        let hooks = signals::install_process_hooks(manager.clone(), SignalOptions { exit_process: false })?;
        if hooks.signals_active() {
            info("Press Ctrl+C to clean up and exit");
            let report = tokio::task::spawn_blocking(move || hooks.wait())
                .await
                .context("Signal watcher failed")?;
            drop(cache);
            return print_report(report.as_ref(), &manager.stats(), options.format);
        }
        warning("Signal handlers unavailable on this platform");
        drop(hooks);
        drop(cache);
        return print_report(None, &manager.stats(), options.format);
    }

    info("Press Ctrl+C to clean up and exit");
    let shutdown_signal = signals::create_shutdown_listener()?;
    shutdown_signal.await;

    let report = run_cleanup(&manager, options.force)?;
    drop(cache);
    print_report(report.as_ref(), &manager.stats(), options.format)
}

fn run_cleanup(manager: &CleanupManager, force: bool) -> Result<Option<ShutdownReport>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.yellow} {msg}")?,
    );
    spinner.set_message(if force { "Forcing cleanup..." } else { "Cleaning up..." });
    spinner.enable_steady_tick(Duration::from_millis(100));

    let report = if force {
        Some(manager.force_cleanup())
    } else {
        manager.cleanup_all()
    };

    spinner.finish_and_clear();
    Ok(report)
}

fn print_report(report: Option<&ShutdownReport>, stats: &StatsSnapshot, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "report": report,
                "stats": stats,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            if let Some(report) = report {
                println!();
                println!("{}", "Cleanup tasks".bright_white().bold());
                for outcome in &report.tasks.details {
                    let status = if outcome.success {
                        "ok".green()
                    } else if outcome.timed_out {
                        "timeout".yellow()
                    } else {
                        "failed".red()
                    };
                    let elapsed = format!("{:.1?}", outcome.execution_time);
                    println!(
                        "  {:<8} {:<24} {:>10}  {}",
                        outcome.priority.as_str().cyan(),
                        outcome.name,
                        elapsed,
                        status
                    );
                    if let Some(err) = &outcome.error {
                        println!("           {}", err.dimmed());
                    }
                }
                println!();
            }
            println!("  {} {}", "Tasks executed:".bright_white(), stats.tasks_executed);
            println!("  {} {}", "Tasks failed:".bright_white(), stats.tasks_failed);
            println!("  {} {}", "Resources cleaned:".bright_white(), stats.resources_cleaned);
            println!("  {} {}", "Temp files removed:".bright_white(), stats.temp_files_cleaned);
            println!("  {} {}", "Temp dirs removed:".bright_white(), stats.temp_dirs_cleaned);
            println!();

            if stats.tasks_failed > 0 {
                warning("Some cleanup tasks failed");
            } else {
                success("Cleanup complete");
            }
        }
    }
    Ok(())
}

/// Validate a configuration file
fn validate_command(file: String) -> Result<()> {
    info(&format!("Validating configuration file: {}", file.bright_white()));

    if !std::path::Path::new(&file).exists() {
        warning("Configuration file not found, defaults would be used");
        return Ok(());
    }

    let contents = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {file}"))?;
    let config = CleanupConfig::from_toml(&contents)?;

    success("Configuration is valid");
    println!("  {} {:.1}s", "Default task timeout:".bright_white(), config.shutdown.default_timeout_secs);
    println!("  {} {}", "Signal handlers:".bright_white(), config.shutdown.install_signal_handlers);
    println!("  {} {}", "Temp prefix:".bright_white(), config.temp.prefix);
    Ok(())
}

/// Print the effective configuration
fn show_config_command(file: String) -> Result<()> {
    let config = CleanupConfig::load(&file)?;
    print!("{}", config.to_toml()?);
    Ok(())
}
