// Chroma Cleanup - operator CLI
// Runs and inspects shutdown cleanup sessions for the Chroma color picker

mod cli;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    if let Err(e) = cli::commands::execute(cli.command).await {
        cli::error(&format!("{e:#}"));
        std::process::exit(1);
    }

    Ok(())
}
