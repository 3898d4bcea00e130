//! Reconciliation writer: classify aggregated products against what is already
//! stored, then persist them as sequential, size-capped merge-upsert batches.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

use super::store::{ProductStore, ProductWrite};
use crate::aggregator::AggregatedProduct;
use crate::config::clamp_batch_size;

#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Capped to the store ceiling on use.
    pub batch_size: usize,
    /// Written as `updatedAt` on every record of the run.
    pub run_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub processed: usize,
    pub new_count: usize,
    pub updated_count: usize,
    pub batches: usize,
}

/// Count how many products are already stored (updated) versus not (new).
pub fn classify(existing: &HashSet<String>, products: &[AggregatedProduct]) -> (usize, usize) {
    let updated = products.iter().filter(|p| existing.contains(&p.id)).count();
    (products.len() - updated, updated)
}

/// Persist `products` in order, `opts.batch_size` per commit.
///
/// An unreadable id baseline only affects the new/updated split in the report;
/// writes are merges either way. A failed commit is returned as an error and
/// batches committed before it stay in the store.
pub async fn reconcile_and_write<S>(
    store: &S,
    products: Vec<AggregatedProduct>,
    opts: &WriteOptions,
) -> Result<WriteReport>
where
    S: ProductStore + ?Sized,
{
    let existing = match store.existing_ids().await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = ?e, "could not read existing product ids; treating all as new");
            HashSet::new()
        }
    };

    let (new_count, updated_count) = classify(&existing, &products);
    let processed = products.len();
    let batch_size = clamp_batch_size(opts.batch_size);
    let last_check = Utc::now();

    let writes: Vec<ProductWrite> = products
        .into_iter()
        .map(|p| ProductWrite::automated(p, opts.run_at, last_check))
        .collect();

    let mut batches = 0usize;
    let mut committed = 0usize;
    for chunk in writes.chunks(batch_size) {
        store.commit_batch(chunk).await.with_context(|| {
            format!(
                "batch {} failed after {committed} of {processed} products were committed",
                batches + 1
            )
        })?;
        batches += 1;
        committed += chunk.len();
        info!(batch = batches, size = chunk.len(), committed, processed, "batch committed");
    }

    let report = WriteReport {
        processed,
        new_count,
        updated_count,
        batches,
    };
    info!(
        processed,
        new = new_count,
        updated = updated_count,
        batches,
        "reconciliation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_BATCH_SIZE, MAX_BATCH_OPS};
    use crate::database_ops::memory_store::MemoryStore;
    use crate::normalization::ProductOffer;
    use chrono::TimeZone;
    use serde_json::json;

    fn product(id: &str) -> AggregatedProduct {
        AggregatedProduct {
            id: id.to_string(),
            title: format!("Ürün {id}"),
            brand: "Marka".into(),
            image_url: String::new(),
            category: "Temel Gıda".into(),
            normalized_title: format!("urun{id}"),
            offers: vec![ProductOffer {
                chain: "A101".into(),
                branch: "Ulus".into(),
                price: 10.0,
                unit_price_text: String::new(),
            }],
        }
    }

    fn products(n: usize) -> Vec<AggregatedProduct> {
        (0..n).map(|i| product(&format!("p{i}"))).collect()
    }

    fn opts() -> WriteOptions {
        WriteOptions {
            batch_size: DEFAULT_BATCH_SIZE,
            run_at: Utc.with_ymd_and_hms(2026, 10, 14, 3, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn batches_never_exceed_cap() {
        for (n, expected) in [
            (1usize, vec![1usize]),
            (399, vec![399]),
            (400, vec![400]),
            (401, vec![400, 1]),
            (1000, vec![400, 400, 200]),
        ] {
            let store = MemoryStore::new();
            let report = reconcile_and_write(&store, products(n), &opts())
                .await
                .unwrap();
            let sizes = store.batch_sizes();
            assert_eq!(sizes, expected, "n = {n}");
            assert!(sizes.iter().all(|s| *s <= 400));
            assert_eq!(report.batches, expected.len());
            assert_eq!(report.processed, n);
            assert_eq!(store.count().await.unwrap(), n as i64);
        }
    }

    #[tokio::test]
    async fn oversized_batch_request_is_clamped_to_ceiling() {
        let store = MemoryStore::new();
        let o = WriteOptions {
            batch_size: 10_000,
            ..opts()
        };
        reconcile_and_write(&store, products(1200), &o).await.unwrap();
        assert_eq!(store.batch_sizes(), vec![MAX_BATCH_OPS, MAX_BATCH_OPS, 200]);
    }

    #[tokio::test]
    async fn classification_splits_new_and_updated() {
        let store = MemoryStore::new();
        store.seed("p1", json!({"title": "eski"})).unwrap();
        store.seed("p3", json!({"title": "eski"})).unwrap();
        store.seed("gone", json!({"title": "başka"})).unwrap();

        let report = reconcile_and_write(&store, products(5), &opts())
            .await
            .unwrap();
        assert_eq!(report.updated_count, 2);
        assert_eq!(report.new_count, 3);
        assert_eq!(report.new_count + report.updated_count, report.processed);
        // Untouched record survives; the pipeline never deletes.
        assert!(store.get("gone").is_some());
    }

    #[tokio::test]
    async fn unreadable_baseline_reports_everything_new_but_still_writes() {
        let store = MemoryStore::new().with_failing_reads();
        store.seed("p0", json!({"title": "eski", "pinned": true})).unwrap();
        let report = reconcile_and_write(&store, products(3), &opts())
            .await
            .unwrap();
        assert_eq!(report.new_count, 3);
        assert_eq!(report.updated_count, 0);
        let doc = store.get("p0").unwrap();
        assert_eq!(doc["title"], json!("Ürün p0"));
        assert_eq!(doc["pinned"], json!(true));
    }

    #[tokio::test]
    async fn failed_batch_propagates_and_keeps_earlier_batches() {
        let store = MemoryStore::new().with_failing_commit(1);
        let err = reconcile_and_write(&store, products(1000), &opts())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("batch 2 failed after 400 of 1000"));
        assert_eq!(store.count().await.unwrap(), 400);
        assert_eq!(store.batch_sizes(), vec![400]);
    }

    #[tokio::test]
    async fn records_carry_timestamps_and_provenance() {
        let store = MemoryStore::new();
        reconcile_and_write(&store, products(1), &opts()).await.unwrap();
        let doc = store.get("p0").unwrap();
        assert_eq!(doc["source"], json!("system_auto"));
        assert_eq!(doc["updatedAt"], json!("2026-10-14T03:00:00Z"));
        assert!(doc["lastPriceCheck"].is_string());
        assert_eq!(doc["category"], json!("Temel Gıda"));
        assert_eq!(doc["markets"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_input_commits_nothing() {
        let store = MemoryStore::new();
        let report = reconcile_and_write(&store, Vec::new(), &opts())
            .await
            .unwrap();
        assert_eq!(report, WriteReport::default());
        assert!(store.batch_sizes().is_empty());
    }
}
