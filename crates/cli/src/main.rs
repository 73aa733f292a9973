//! murmur CLI, the main entry point.
//!
//! Commands:
//! - `init`    Write a default config to `~/.murmur/config.toml`
//! - `run`     Poll the configured channels and reply when appropriate
//! - `status`  Show the config summary and store statistics
//! - `doctor`  Diagnose config, transport, backend and store
//! - `ingest`  Load knowledge documents into the store
//! - `prune`   Delete stored messages older than a cutoff

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Debug, Parser)]
#[command(
    name = "murmur",
    about = "murmur: a cooldown-paced conversational agent for Discord channels",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file (defaults to ~/.murmur/config.toml)
    #[arg(short, long, global = true, env = "MURMUR_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Start the agent on the configured channels
    Run,

    /// Show configuration and store statistics
    Status,

    /// Diagnose system health
    Doctor,

    /// Ingest knowledge documents (JSON arrays, plain text files or web pages)
    Ingest {
        /// Files or http(s) URLs; retrieval.base_urls from the config are added
        sources: Vec<String>,

        /// Extra tags applied to every fragment
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Delete stored messages older than the cutoff
    Prune {
        /// Keep this many days of history (default: drop everything before today, UTC)
        #[arg(short, long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Init { force } => commands::init::run(config_path, force).await?,
        Commands::Run => commands::run::run(config_path).await?,
        Commands::Status => commands::status::run(config_path).await?,
        Commands::Doctor => commands::doctor::run(config_path).await?,
        Commands::Ingest { sources, tags } => {
            commands::ingest::run(config_path, &sources, &tags).await?
        }
        Commands::Prune { days } => commands::prune::run(config_path, days).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["murmur", "status", "--config", "/tmp/m.toml", "-v"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/m.toml")));
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn ingest_takes_files_and_urls_and_splits_tags() {
        assert!(matches!(
            Cli::try_parse_from(["murmur", "ingest"]).unwrap().command,
            Commands::Ingest { ref sources, .. } if sources.is_empty()
        ));

        let cli = Cli::try_parse_from([
            "murmur",
            "ingest",
            "a.json",
            "https://docs.example.org/faq",
            "--tags",
            "defi,faq",
        ])
        .unwrap();
        match cli.command {
            Commands::Ingest { sources, tags } => {
                assert_eq!(sources, vec!["a.json", "https://docs.example.org/faq"]);
                assert_eq!(tags, vec!["defi", "faq"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn prune_days_is_optional() {
        let cli = Cli::try_parse_from(["murmur", "prune"]).unwrap();
        assert!(matches!(cli.command, Commands::Prune { days: None }));

        let cli = Cli::try_parse_from(["murmur", "prune", "--days", "7"]).unwrap();
        assert!(matches!(cli.command, Commands::Prune { days: Some(7) }));
    }
}
