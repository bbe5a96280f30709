// Command Line Interface Module
// Operator CLI for running and inspecting cleanup sessions

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;

/// Chroma Cleanup - shutdown coordinator for the Chroma color picker
#[derive(Parser)]
#[command(name = "chroma-cleanup")]
#[command(author = "Chroma Picker Team")]
#[command(version)]
#[command(about = "Prioritized shutdown cleanup for temp files, tracked resources and cleanup tasks", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a demo picker session and clean it up on exit
    Run {
        /// Configuration file path
        #[arg(short, long, default_value = chroma_cleanup::config::DEFAULT_CONFIG_FILE)]
        config: String,

        /// Clean up immediately instead of waiting for Ctrl+C / SIGTERM
        #[arg(long)]
        once: bool,

        /// Use the emergency path: critical tasks only, no timeouts
        #[arg(long)]
        force: bool,

        /// Number of preview thumbnails to create
        #[arg(short, long, default_value = "4")]
        previews: usize,

        /// Where the unsaved palette is flushed on shutdown
        #[arg(long)]
        palette_out: Option<String>,

        /// Report format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[arg(short, long, default_value = chroma_cleanup::config::DEFAULT_CONFIG_FILE)]
        file: String,
    },

    /// Print the effective configuration as TOML
    ShowConfig {
        /// Configuration file to read
        #[arg(short, long, default_value = chroma_cleanup::config::DEFAULT_CONFIG_FILE)]
        file: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue().bold(), msg);
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow().bold(), msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["chroma-cleanup", "run", "--once", "--previews", "2"]);
        match cli.command {
            Commands::Run { once, previews, format, force, .. } => {
                assert!(once);
                assert!(!force);
                assert_eq!(previews, 2);
                assert_eq!(format, OutputFormat::Text);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_json_format_and_defaults() {
        let cli = Cli::parse_from(["chroma-cleanup", "run", "-f", "json"]);
        match cli.command {
            Commands::Run { config, format, .. } => {
                assert_eq!(config, "chroma-cleanup.toml");
                assert_eq!(format, OutputFormat::Json);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_validate_parsing() {
        let cli = Cli::parse_from(["chroma-cleanup", "validate", "--file", "custom.toml"]);
        assert!(matches!(cli.command, Commands::Validate { file } if file == "custom.toml"));
    }
}
