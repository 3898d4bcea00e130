//! One ingestion run: crawl every category in bounded groups, merge, write once.
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use itertools::Itertools;
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

use crate::aggregator::Aggregator;
use crate::config::IngestConfig;
use crate::crawler::{crawl_category, CategoryOutcome, CrawlOptions, PageSource};
use crate::database_ops::market_prices::{reconcile_and_write, WriteOptions, WriteReport};
use crate::database_ops::store::ProductStore;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub categories: Vec<CategoryOutcome>,
    pub products: usize,
    pub write: WriteReport,
}

impl RunReport {
    /// True when at least one category stopped on an unfetchable page.
    pub fn is_partial(&self) -> bool {
        self.categories.iter().any(CategoryOutcome::failed)
    }

    pub fn failed_categories(&self) -> Vec<&str> {
        failed_categories(&self.categories)
    }
}

fn failed_categories(outcomes: &[CategoryOutcome]) -> Vec<&str> {
    outcomes
        .iter()
        .filter(|c| c.failed())
        .map(|c| c.category.as_str())
        .collect()
}

/// Crawl all configured categories and return the merged aggregate with the
/// per-category outcomes, in category order.
///
/// Categories run `concurrency` at a time; a group finishes completely before
/// the next starts. Partial aggregates are folded in category order at each
/// join, so the first-seen category of a product is deterministic.
pub async fn crawl_all<S>(source: &S, cfg: &IngestConfig) -> (Aggregator, Vec<CategoryOutcome>)
where
    S: PageSource + ?Sized,
{
    let opts = CrawlOptions::new(cfg.page_delay.clone(), cfg.max_pages);
    let mut merged = Aggregator::new();
    let mut outcomes = Vec::with_capacity(cfg.categories.len());

    for (group_idx, group) in cfg.categories.chunks(cfg.concurrency.max(1)).enumerate() {
        info!(group = group_idx + 1, categories = ?group, "category group started");
        let results = join_all(
            group
                .iter()
                .map(|category| crawl_category(source, category, &opts)),
        )
        .await;
        for (outcome, partial) in results {
            merged.absorb(partial);
            outcomes.push(outcome);
        }
        info!(
            group = group_idx + 1,
            products = merged.len(),
            offers = merged.offer_count(),
            "category group finished"
        );
    }

    (merged, outcomes)
}

/// Full run: crawl, then one reconciliation write of everything collected.
pub async fn run_pipeline<P, S>(source: &P, store: &S, cfg: &IngestConfig) -> Result<RunReport>
where
    P: PageSource + ?Sized,
    S: ProductStore + ?Sized,
{
    let started_at = Utc::now();
    let t0 = Instant::now();
    info!(
        categories = cfg.categories.len(),
        concurrency = cfg.concurrency,
        batch_size = cfg.batch_size,
        "price ingestion run started"
    );

    let (merged, categories) = crawl_all(source, cfg).await;
    let products = merged.finalize();
    let product_count = products.len();

    let failed = failed_categories(&categories);
    if !failed.is_empty() {
        warn!(
            failed = %failed.iter().join(", "),
            "some categories stopped early; writing what was collected"
        );
    }

    let write = reconcile_and_write(
        store,
        products,
        &WriteOptions {
            batch_size: cfg.batch_size,
            run_at: started_at,
        },
    )
    .await?;

    let report = RunReport {
        started_at,
        elapsed_ms: t0.elapsed().as_millis() as u64,
        categories,
        products: product_count,
        write,
    };
    info!(
        products = report.products,
        new = report.write.new_count,
        updated = report.write.updated_count,
        partial = report.is_partial(),
        elapsed_ms = report.elapsed_ms,
        "price ingestion run finished"
    );
    Ok(report)
}
