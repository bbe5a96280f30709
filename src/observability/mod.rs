// Observability infrastructure using tracing crate
// Structured logging for cleanup passes; JSON by default for machine parsing

use crate::config::{LogFormat, LoggingConfig};
use anyhow::{anyhow, Result};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize the global subscriber. Logs go to stderr so stdout stays free
/// for reports.
///
/// RUST_LOG wins over the configured filter, e.g. RUST_LOG=chroma_cleanup=debug.
/// If a subscriber is already installed it is kept and this is a no-op.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter_layer = build_filter(&config.filter)?;
    let registry = tracing_subscriber::registry().with(filter_layer);

    let result = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_thread_names(true),
            )
            .try_init(),
    };

    if let Err(e) = result {
        // The existing subscriber stays in charge
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
    Ok(())
}

fn build_filter(fallback: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .map_err(|e| anyhow!("Invalid log filter '{fallback}': {e}"))
}
