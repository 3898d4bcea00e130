use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use market_prices::api::ApiServer;
use market_prices::config::{IngestConfig, DEFAULT_BATCH_SIZE};
use market_prices::crawler::PageSource;
use market_prices::database_ops::db::Db;
use market_prices::database_ops::marketfiyati::MarketFiyatiProvider;
use market_prices::database_ops::memory_store::MemoryStore;
use market_prices::database_ops::store::ProductStore;
use market_prices::logging::{init_tracing, DEFAULT_FILTER};
use market_prices::orchestrator::run_pipeline;
use market_prices::scheduler::{start_weekly, IngestRunner};
use market_prices::util::env;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mp", version, about = "Market price ingestion CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Crawl every category once and write the merged result
    Run {
        /// Write into an in-memory store instead of the database
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Exit with an error when any category stopped early
        #[arg(long, default_value_t = false)]
        strict: bool,
        /// Override the configured categories (comma separated)
        #[arg(long, value_delimiter = ',')]
        categories: Option<Vec<String>>,
        /// Stop each category after this many pages
        #[arg(long)]
        max_pages: Option<u32>,
    },
    /// Run the weekly scheduler until interrupted
    Schedule {
        /// Also serve the status API from this process
        #[arg(long, default_value_t = false)]
        with_api: bool,
    },
    /// Print the number of stored products
    Count,
    /// Delete products whose last automated update is at or before a cutoff
    Prune {
        /// RFC3339 cutoff, e.g. 2026-01-01T00:00:00Z
        #[arg(long)]
        before: String,
        /// Required to actually delete
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

async fn connect_store() -> Result<Db> {
    env::preflight_check(
        "mp",
        &[],
        &["DATABASE_URL", "DB_HOST", "DB_DATABASE", "MARKET_API_URL"],
    )?;
    let database_url = env::db_url()?;
    let db = Db::connect(&database_url, 5).await?;
    db.ensure_schema().await?;
    Ok(db)
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing(DEFAULT_FILTER)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            dry_run,
            strict,
            categories,
            max_pages,
        } => {
            let mut cfg = IngestConfig::from_env()?;
            if let Some(list) = categories {
                cfg.categories = list
                    .into_iter()
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
            }
            if max_pages.is_some() {
                cfg.max_pages = max_pages;
            }
            if cfg.categories.is_empty() {
                bail!("no categories to crawl");
            }

            let source = MarketFiyatiProvider::new(cfg.upstream.clone())?;
            let report = if dry_run {
                info!("dry run: writing into an in-memory store");
                let store = MemoryStore::new();
                run_pipeline(&source, &store, &cfg).await?
            } else {
                let store = connect_store().await?;
                run_pipeline(&source, &store, &cfg).await?
            };

            println!("{}", serde_json::to_string_pretty(&report)?);
            if strict && report.is_partial() {
                bail!(
                    "categories stopped early: {}",
                    report.failed_categories().join(", ")
                );
            }
        }
        Commands::Schedule { with_api } => {
            let cfg = IngestConfig::from_env()?;
            let source: Arc<dyn PageSource> =
                Arc::new(MarketFiyatiProvider::new(cfg.upstream.clone())?);
            let store: Arc<dyn ProductStore> = Arc::new(connect_store().await?);
            let runner = IngestRunner::new(source, store.clone(), cfg);
            let mut sched = start_weekly(runner).await?;

            if with_api {
                let server = ApiServer::from_env()?;
                tokio::select! {
                    res = server.run(store) => {
                        if let Err(e) = res {
                            warn!(error = ?e, "status API stopped");
                        }
                    }
                    _ = tokio::signal::ctrl_c() => info!("interrupt received"),
                }
            } else {
                tokio::signal::ctrl_c()
                    .await
                    .context("waiting for interrupt")?;
                info!("interrupt received");
            }
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Count => {
            let store = connect_store().await?;
            let n = store.count().await?;
            println!("{n}");
        }
        Commands::Prune { before, yes } => {
            let cutoff: DateTime<Utc> = DateTime::parse_from_rfc3339(before.trim())
                .with_context(|| format!("invalid --before {before:?}"))?
                .with_timezone(&Utc);
            if !yes {
                bail!("prune deletes every product updated at or before {cutoff}; pass --yes to proceed");
            }
            let store = connect_store().await?;
            let deleted = store
                .delete_updated_before(cutoff, DEFAULT_BATCH_SIZE)
                .await?;
            info!(deleted, cutoff = %cutoff, "prune finished");
            println!("{deleted}");
        }
    }

    Ok(())
}
