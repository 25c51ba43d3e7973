use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vindelta_core::config::Settings;
use vindelta_core::delta_queue::PgDeltaQueue;
use vindelta_core::pipeline::{self, PipelineContext, RunReport};
use vindelta_core::sources::{PgConfirmationSource, PgContactSource};
use vindelta_core::db;

#[derive(Parser, Debug)]
#[command(author, version, about = "Delivery-state reconciliation batch", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process today's feed, falling back to the queue if no feed landed
    Run(RunArgs),
    /// Drain the delta queue without reading a feed
    Delta,
    /// Run database migrations
    Migrate,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Read the feed from this path instead of VINDELTA_FEED_PATH
    #[arg(long)]
    feed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    match cli.command {
        Command::Run(args) => {
            let mut settings = Settings::from_env().context("settings could not be loaded")?;
            if let Some(feed) = args.feed {
                settings.feed_path = feed;
            }
            let pool = connect_pool().await?;
            let queue = PgDeltaQueue::new(pool.clone(), settings.rules.clone());
            let confirmations = PgConfirmationSource::new(pool.clone());
            let contacts = PgContactSource::new(pool.clone());
            let ctx = PipelineContext {
                queue: &queue,
                confirmations: &confirmations,
                contacts: &contacts,
                rules: settings.rules.clone(),
            };
            let report = pipeline::run(&ctx, &settings).await?;
            print_report(&report)
        }
        Command::Delta => {
            let settings = Settings::from_env().context("settings could not be loaded")?;
            let pool = connect_pool().await?;
            let queue = PgDeltaQueue::new(pool.clone(), settings.rules.clone());
            let confirmations = PgConfirmationSource::new(pool.clone());
            let contacts = PgContactSource::new(pool.clone());
            let ctx = PipelineContext {
                queue: &queue,
                confirmations: &confirmations,
                contacts: &contacts,
                rules: settings.rules.clone(),
            };
            let report = pipeline::run_delta_only(&ctx, &settings).await?;
            print_report(&report)
        }
        Command::Migrate => {
            let pool = connect_pool().await?;
            db::run_migrations(&pool).await?;
            info!("Database migrations applied");
            Ok(())
        }
    }
}

fn print_report(report: &RunReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

async fn connect_pool() -> Result<db::DbPool> {
    let database_url = std::env::var("DATABASE_URL")
        .or_else(|_| std::env::var("VINDELTA_DATABASE_URL"))
        .context("DATABASE_URL (or VINDELTA_DATABASE_URL) must be set")?;
    Ok(db::connect(&database_url).await?)
}
