//! Pagination driver for a single category.
//!
//! The upstream has no "last page" marker: a page with zero items is the only
//! end-of-data signal, so the crawl walks pages from 0 until one comes back
//! empty or cannot be fetched at all.
use async_trait::async_trait;
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

use crate::aggregator::Aggregator;
use crate::config::PageDelay;
use crate::database_ops::marketfiyati::{RawListing, UpstreamError};
use crate::normalization::normalize_listing;

/// Anything that can hand out pages of raw listings for a category.
/// Implementations own their retry policy; an `Err` means the page is lost.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, category: &str, page: u32)
        -> Result<Vec<RawListing>, UpstreamError>;
}

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub page_delay: PageDelay,
    pub max_pages: Option<u32>,
}

impl CrawlOptions {
    pub fn new(page_delay: PageDelay, max_pages: Option<u32>) -> Self {
        Self {
            page_delay,
            max_pages,
        }
    }
}

/// How a category crawl ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CrawlStatus {
    /// An empty page was reached.
    Completed,
    /// The configured page cap was hit before an empty page.
    PageLimit { limit: u32 },
    /// A page could not be fetched; earlier pages are kept.
    Failed { page: u32, error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryOutcome {
    pub category: String,
    pub pages_fetched: u32,
    pub listings_seen: usize,
    pub listings_kept: usize,
    pub products: usize,
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub status: CrawlStatus,
}

impl CategoryOutcome {
    pub fn failed(&self) -> bool {
        matches!(self.status, CrawlStatus::Failed { .. })
    }
}

/// Result of fetching one page, as seen by the state machine.
enum PageState {
    HasItems(Vec<RawListing>),
    Empty,
    Failed(UpstreamError),
}

/// Crawl one category to exhaustion, returning its outcome and the partial
/// aggregate of everything collected (including pages fetched before a failure).
pub async fn crawl_category<S>(
    source: &S,
    category: &str,
    opts: &CrawlOptions,
) -> (CategoryOutcome, Aggregator)
where
    S: PageSource + ?Sized,
{
    let started = Instant::now();
    let mut agg = Aggregator::new();
    let mut page = 0u32;
    let mut listings_seen = 0usize;
    let mut listings_kept = 0usize;

    info!(category, "category crawl started");

    let status = loop {
        if let Some(limit) = opts.max_pages {
            if page >= limit {
                warn!(category, limit, "page cap reached before an empty page");
                break CrawlStatus::PageLimit { limit };
            }
        }

        let state = match source.fetch_page(category, page).await {
            Ok(items) if items.is_empty() => PageState::Empty,
            Ok(items) => PageState::HasItems(items),
            Err(e) => PageState::Failed(e),
        };

        match state {
            PageState::Empty => break CrawlStatus::Completed,
            PageState::Failed(e) => {
                warn!(
                    category,
                    page,
                    error = %e,
                    kept_products = agg.len(),
                    "category crawl stopped on unfetchable page"
                );
                break CrawlStatus::Failed {
                    page,
                    error: e.to_string(),
                };
            }
            PageState::HasItems(items) => {
                let count = items.len();
                listings_seen += count;
                for listing in items.iter().filter_map(normalize_listing) {
                    listings_kept += 1;
                    agg.merge(category, listing);
                }
                info!(category, page, items = count, products = agg.len(), "page processed");
                page += 1;
                tokio::time::sleep(opts.page_delay.sample()).await;
            }
        }
    };

    let outcome = CategoryOutcome {
        category: category.to_string(),
        pages_fetched: page,
        listings_seen,
        listings_kept,
        products: agg.len(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        status,
    };
    info!(
        category,
        pages = outcome.pages_fetched,
        products = outcome.products,
        failed = outcome.failed(),
        "category crawl finished"
    );
    (outcome, agg)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;

    fn opts() -> CrawlOptions {
        CrawlOptions::new(PageDelay::none(), None)
    }

    #[tokio::test]
    async fn walks_pages_until_empty() {
        let src = ScriptedSource::default().with(
            "Temel Gıda",
            vec![
                Scripted::Page(vec![raw("a", &[("A101", "Ulus", json!(5))])]),
                Scripted::Page(vec![raw("b", &[("BIM", "Ulus", json!("7.5"))])]),
            ],
        );
        let (outcome, agg) = crawl_category(&src, "Temel Gıda", &opts()).await;
        assert_eq!(outcome.status, CrawlStatus::Completed);
        assert_eq!(outcome.pages_fetched, 2);
        assert_eq!(agg.len(), 2);
        let calls = src.calls.lock().unwrap().clone();
        assert_eq!(
            calls.iter().map(|(_, p)| *p).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[tokio::test]
    async fn failure_keeps_items_from_earlier_pages() {
        let src = ScriptedSource::default().with(
            "İçecek",
            vec![
                Scripted::Page(vec![raw("a", &[("A101", "Ulus", json!(5))])]),
                Scripted::Fail,
                Scripted::Page(vec![raw("never", &[("A101", "Ulus", json!(5))])]),
            ],
        );
        let (outcome, agg) = crawl_category(&src, "İçecek", &opts()).await;
        assert!(outcome.failed());
        assert!(matches!(outcome.status, CrawlStatus::Failed { page: 1, .. }));
        assert_eq!(agg.len(), 1);
        assert!(agg.get("never").is_none());
    }

    #[tokio::test]
    async fn first_page_failure_contributes_nothing() {
        let src = ScriptedSource::default().with("X", vec![Scripted::Fail]);
        let (outcome, agg) = crawl_category(&src, "X", &opts()).await;
        assert!(outcome.failed());
        assert_eq!(outcome.pages_fetched, 0);
        assert!(agg.is_empty());
    }

    #[tokio::test]
    async fn invalid_prices_are_counted_but_not_kept() {
        let src = ScriptedSource::default().with(
            "X",
            vec![Scripted::Page(vec![
                raw("bad", &[("A101", "Ulus", json!("abc"))]),
                raw("good", &[("A101", "Ulus", json!("abc")), ("SOK", "Ulus", json!(3))]),
            ])],
        );
        let (outcome, agg) = crawl_category(&src, "X", &opts()).await;
        assert_eq!(outcome.listings_seen, 2);
        assert_eq!(outcome.listings_kept, 1);
        assert!(agg.get("bad").is_none());
        assert_eq!(agg.get("good").unwrap().offers.len(), 1);
    }

    #[tokio::test]
    async fn page_cap_stops_an_endless_category() {
        let pages = (0..10)
            .map(|i| Scripted::Page(vec![raw(&format!("p{i}"), &[("A101", "Ulus", json!(1))])]))
            .collect();
        let src = ScriptedSource::default().with("X", pages);
        let (outcome, agg) =
            crawl_category(&src, "X", &CrawlOptions::new(PageDelay::none(), Some(3))).await;
        assert_eq!(outcome.status, CrawlStatus::PageLimit { limit: 3 });
        assert_eq!(agg.len(), 3);
    }
}
