use std::path::PathBuf;

use clap::Parser;
use kiln_core::KILN_LOG_VAR;

mod commands;
mod config;
mod summary;

use commands::Commands;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Development-time compile and execution server", long_about = None)]
#[command(version)]
struct Cli {
    /// Project root directory
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env(KILN_LOG_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    cli.command.execute(cli.project).await
}
