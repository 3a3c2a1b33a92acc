//! Keystep CLI - Main Entry Point
//!
//! Runs free-text test scenarios against a live application, lists the
//! step rules it understands, and searches scenarios for phrases.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use keystep_common::KeystepConfig;

mod commands;
mod output;

use commands::{find, rules, run};

/// Keystep - keyword-driven scenario runner
#[derive(Parser)]
#[command(name = "keystep")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "keystep.toml", global = true, env = "KEYSTEP_CONFIG")]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios
    Run(run::RunArgs),

    /// List the registered step rules
    Rules(rules::RulesArgs),

    /// Find scenarios whose steps contain given phrases
    Find(find::FindArgs),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let config = KeystepConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Run(args) => run::execute(args, &config, cli.format).await?,
        Commands::Rules(args) => rules::execute(args, cli.format)?,
        Commands::Find(args) => find::execute(args, &config, cli.format).await?,
        Commands::Version => {
            println!("keystep v{}", keystep_common::VERSION);
        }
    }

    Ok(())
}
