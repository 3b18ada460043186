mod commands;
mod config;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{
    checkout::CheckoutCommand, diff::DiffCommand, forget::ForgetCommand, index::IndexCommand,
    init::InitCommand, log::LogCommand, purge::PurgeCommand, show::ShowCommand,
};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(
    name = "reprise",
    about = "Content-addressed snapshots of a directory tree",
    long_about = "Reprise records deduplicated, encrypted snapshots of a data directory and restores any of them in place"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, env = "REPRISE_REPO", help = "Repository path")]
    repo: Option<PathBuf>,

    #[arg(long, global = true, env = "REPRISE_DATA", help = "Data directory to snapshot")]
    data: Option<PathBuf>,

    #[arg(long, global = true, env = "REPRISE_PASSWORD", hide_env_values = true, help = "Repository password")]
    password: Option<String>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Initialize a new repository")]
    Init(InitCommand),

    #[command(about = "Snapshot the data directory")]
    Index(IndexCommand),

    #[command(about = "Restore the data directory to a snapshot")]
    Checkout(CheckoutCommand),

    #[command(about = "List snapshots, newest first")]
    Log(LogCommand),

    #[command(about = "List the files of a snapshot")]
    Show(ShowCommand),

    #[command(about = "Compare two snapshots")]
    Diff(DiffCommand),

    #[command(about = "Drop snapshots from history")]
    Forget(ForgetCommand),

    #[command(about = "Delete data no retained snapshot references")]
    Purge(PurgeCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet)?;
    debug!("Starting Reprise");

    match &cli.command {
        Commands::Init(cmd) => cmd.run(&cli).await,
        Commands::Index(cmd) => cmd.run(&cli).await,
        Commands::Checkout(cmd) => cmd.run(&cli).await,
        Commands::Log(cmd) => cmd.run(&cli).await,
        Commands::Show(cmd) => cmd.run(&cli).await,
        Commands::Diff(cmd) => cmd.run(&cli).await,
        Commands::Forget(cmd) => cmd.run(&cli).await,
        Commands::Purge(cmd) => cmd.run(&cli).await,
    }
}

fn init_tracing(verbose: bool, quiet: bool) -> Result<()> {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "reprise_cli={},reprise_core={}",
            level, level
        )))
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_checkout() {
        let cli = Cli::try_parse_from([
            "reprise", "--repo", "/r", "checkout", "abc", "--target", "/t", "--force",
        ])
        .unwrap();
        assert_eq!(cli.repo, Some(PathBuf::from("/r")));
        assert!(matches!(cli.command, Commands::Checkout(_)));
    }
}
