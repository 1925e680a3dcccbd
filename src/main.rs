mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jobharvest::config::Config;

#[derive(Parser)]
#[command(
    name = "jobharvest",
    version,
    about = "Crawl orchestration engine for harvesting job postings",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the rotation schedule and the plan for the current run
    Plan {
        /// Pin the run slot
        #[arg(long)]
        slot: Option<i64>,

        /// Print the plan as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Execute one harvesting run
    Run {
        /// Pin the run slot
        #[arg(long)]
        slot: Option<i64>,

        /// Force the backlog window on
        #[arg(long, conflicts_with = "fresh_only")]
        backlog: bool,

        /// Force the backlog window off
        #[arg(long)]
        fresh_only: bool,

        /// Cap candidates, searches and detail pages
        #[arg(long)]
        test_mode: bool,

        /// Stop scheduling new work after this many fetched URLs
        #[arg(long)]
        max_urls: Option<usize>,

        /// Extract and dedup without sending anything
        #[arg(long)]
        dry_run: bool,

        /// Write Prometheus metrics to this file when the run ends
        #[arg(long)]
        metrics_out: Option<PathBuf>,
    },

    /// Resolve working listing URLs for one origin
    Resolve {
        /// Origin, e.g. https://careers.example.com
        origin: String,

        /// Target id used for caching (defaults to the host)
        #[arg(long)]
        id: Option<String>,
    },

    /// Fetch one URL through the cascade
    Fetch {
        url: String,

        /// Attempt budget for this fetch
        #[arg(long)]
        budget: Option<u32>,
    },

    /// Check the ingestion API accepts the configured secret
    Auth,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    tracing::info!("jobharvest starting");

    match cli.command {
        Commands::Plan { slot, json } => {
            tracing::info!(slot = ?slot, json = %json, "Starting plan command");
            commands::plan(config, slot, json)?;
        }
        Commands::Run {
            slot,
            backlog,
            fresh_only,
            test_mode,
            max_urls,
            dry_run,
            metrics_out,
        } => {
            tracing::info!(
                slot = ?slot,
                backlog = %backlog,
                fresh_only = %fresh_only,
                test_mode = %test_mode,
                max_urls = ?max_urls,
                dry_run = %dry_run,
                "Starting run command"
            );
            let options = commands::RunOptions {
                slot,
                backlog,
                fresh_only,
                test_mode,
                max_urls,
                dry_run,
                metrics_out,
            };
            commands::run(config, options).await?;
        }
        Commands::Resolve { origin, id } => {
            tracing::info!(origin = %origin, id = ?id, "Starting resolve command");
            commands::resolve(config, origin, id).await?;
        }
        Commands::Fetch { url, budget } => {
            tracing::info!(url = %url, budget = ?budget, "Starting fetch command");
            commands::fetch(config, url, budget).await?;
        }
        Commands::Auth => {
            commands::auth(config).await?;
        }
    }

    tracing::info!("jobharvest completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("jobharvest=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("jobharvest={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
