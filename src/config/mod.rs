// Configuration Management Module
// Handles chroma-cleanup.toml loading, defaults, and validation

use crate::cleanup::temp::DEFAULT_TEMP_PREFIX;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "chroma-cleanup.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[serde(default)]
    pub temp: TempConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Timeout for tasks registered without an explicit one. <= 0 disables it.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: f64,

    #[serde(default = "default_true")]
    pub install_signal_handlers: bool,

    /// Exit with status 0 after a signal-triggered cleanup
    #[serde(default = "default_true")]
    pub exit_on_signal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Parent for the application temp directory; system temp dir when unset
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,

    /// Used when RUST_LOG is not set
    #[serde(default = "default_filter")]
    pub filter: String,
}

// Default value functions
fn default_timeout_secs() -> f64 { 5.0 }
fn default_true() -> bool { true }
fn default_prefix() -> String { DEFAULT_TEMP_PREFIX.to_string() }
fn default_log_format() -> LogFormat { LogFormat::Json }
fn default_filter() -> String { "chroma_cleanup=info".to_string() }

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            install_signal_handlers: default_true(),
            exit_on_signal: default_true(),
        }
    }
}

impl Default for TempConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            base_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            filter: default_filter(),
        }
    }
}

impl CleanupConfig {
    /// Load configuration from file or use defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .context("Failed to read configuration file")?;

            let config = Self::from_toml(&contents)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: CleanupConfig = toml::from_str(contents)
            .context("Failed to parse configuration file")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.shutdown.default_timeout_secs.is_finite() {
            anyhow::bail!("Default task timeout must be a finite number of seconds");
        }

        let prefix = &self.temp.prefix;
        if prefix.is_empty() {
            anyhow::bail!("Temp prefix cannot be empty");
        }

        if prefix.contains('/') || prefix.contains('\\') || prefix.contains('\0') {
            anyhow::bail!("Temp prefix cannot contain path separators");
        }

        if let Some(base) = &self.temp.base_dir {
            if base.as_os_str().is_empty() {
                anyhow::bail!("Temp base_dir cannot be empty when set");
            }
        }

        if self.logging.filter.trim().is_empty() {
            anyhow::bail!("Log filter cannot be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CleanupConfig::default();
        assert_eq!(config.shutdown.default_timeout_secs, 5.0);
        assert!(config.shutdown.install_signal_handlers);
        assert_eq!(config.temp.prefix, "chroma_cleanup_");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = CleanupConfig::from_toml(
            r#"
            [shutdown]
            default_timeout_secs = 0.0

            [logging]
            format = "pretty"
            "#,
        )
        .unwrap();

        assert_eq!(config.shutdown.default_timeout_secs, 0.0);
        assert!(config.shutdown.exit_on_signal);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.temp.prefix, "chroma_cleanup_");
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let result = CleanupConfig::from_toml("[logging]\nformat = \"xml\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_prefix() {
        let mut config = CleanupConfig::default();
        config.temp.prefix = "../escape".to_string();
        assert!(config.validate().is_err());

        config.temp.prefix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_finite_timeout_rejected() {
        let mut config = CleanupConfig::default();
        config.shutdown.default_timeout_secs = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = CleanupConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = CleanupConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.temp.prefix, config.temp.prefix);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let scratch = tempfile::tempdir().unwrap();
        let config = CleanupConfig::load(scratch.path().join("absent.toml")).unwrap();
        assert_eq!(config.shutdown.default_timeout_secs, 5.0);
    }
}
