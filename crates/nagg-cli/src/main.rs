use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nagg_core::Provider;
use nagg_storage::{NoopArticleCache, PgArticleStore};
use nagg_sync::{RunStatus, SyncConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "nagg")]
#[command(about = "News aggregation ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every enabled provider once, or just one with --provider.
    Sync {
        #[arg(long, value_parser = parse_provider)]
        provider: Option<Provider>,
    },
    /// Apply database migrations to DATABASE_URL.
    Migrate,
    /// Serve the article API (and the scheduler when enabled).
    Serve,
}

fn parse_provider(value: &str) -> Result<Provider, String> {
    value.parse::<Provider>().map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync { provider: None }) {
        Commands::Sync { provider } => {
            let summaries = nagg_sync::run_sync_once_from_env(provider.map(|p| p.as_str())).await?;
            for summary in &summaries {
                if summary.status != RunStatus::Success {
                    warn!(
                        provider = %summary.provider,
                        failed = ?summary.failed_categories(),
                        "provider run incomplete"
                    );
                }
            }
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let url = config
                .database_url
                .context("DATABASE_URL must be set to run migrations")?;
            let store = PgArticleStore::connect(&url, Arc::new(NoopArticleCache))
                .await
                .context("connecting to postgres")?;
            store.migrate().await.context("applying migrations")?;
            info!("migrations complete");
        }
        Commands::Serve => {
            nagg_web::serve_from_env().await?;
        }
    }

    Ok(())
}
