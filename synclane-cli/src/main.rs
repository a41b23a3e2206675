use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use synclane_cli::commands::{convert, run};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Run connector-to-connector replication jobs
#[derive(Parser)]
#[command(name = "synclane")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one replication attempt described by a job file
    Run(run::RunArgs),
    /// Convert a JSON-lines message stream between protocol versions
    Convert(convert::ConvertArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // stdout carries command output, logs go to stderr
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("synclane_cli=debug,synclane_core=debug,synclane_protocol=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Run(args) => run::execute(args).await,
        Commands::Convert(args) => convert::execute(args),
    }
}
