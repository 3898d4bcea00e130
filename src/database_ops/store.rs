//! Document-store seam for the `market_prices` collection.
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::aggregator::AggregatedProduct;
use crate::normalization::ProductOffer;

pub const COLLECTION: &str = "market_prices";

/// Provenance marker written on every record produced by the scheduled ingest.
pub const SOURCE_SYSTEM_AUTO: &str = "system_auto";

/// Fields written for one product. Keys present here overwrite the stored
/// document; anything else already stored is left alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDocument {
    pub title: String,
    pub brand: String,
    pub image_url: String,
    pub category: String,
    pub normalized_title: String,
    pub markets: Vec<ProductOffer>,
    pub updated_at: DateTime<Utc>,
    pub last_price_check: DateTime<Utc>,
    pub source: String,
}

/// One merge-upsert: document id plus the fields to merge into it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductWrite {
    pub id: String,
    pub doc: ProductDocument,
}

impl ProductWrite {
    /// Build the automated-writer record for an aggregated product. Offers are
    /// expected to be deduplicated already (see `Aggregator::finalize`).
    pub fn automated(
        product: AggregatedProduct,
        updated_at: DateTime<Utc>,
        last_price_check: DateTime<Utc>,
    ) -> Self {
        Self {
            id: product.id,
            doc: ProductDocument {
                title: product.title,
                brand: product.brand,
                image_url: product.image_url,
                category: product.category,
                normalized_title: product.normalized_title,
                markets: product.offers,
                updated_at,
                last_price_check,
                source: SOURCE_SYSTEM_AUTO.to_string(),
            },
        }
    }
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Ids of every stored product (id-only projection).
    async fn existing_ids(&self) -> Result<HashSet<String>>;

    /// Apply all writes atomically as one batch of merge-upserts.
    async fn commit_batch(&self, batch: &[ProductWrite]) -> Result<()>;

    /// Number of stored products.
    async fn count(&self) -> Result<i64>;

    /// Delete records whose `updatedAt` is at or before `cutoff`, `batch_size`
    /// ids per delete. Returns the number of deleted records.
    async fn delete_updated_before(&self, cutoff: DateTime<Utc>, batch_size: usize)
        -> Result<u64>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn document_uses_stored_field_names() {
        let at = Utc.with_ymd_and_hms(2026, 10, 14, 3, 0, 0).unwrap();
        let w = ProductWrite::automated(
            AggregatedProduct {
                id: "p1".into(),
                title: "Süt".into(),
                brand: "Sek".into(),
                image_url: "https://img/p1.jpg".into(),
                category: "Süt Ürünleri ve Kahvaltılık".into(),
                normalized_title: "sut".into(),
                offers: vec![ProductOffer {
                    chain: "A101".into(),
                    branch: "Ulus".into(),
                    price: 32.5,
                    unit_price_text: "32,50 TL/L".into(),
                }],
            },
            at,
            at,
        );
        assert_eq!(w.id, "p1");
        let v = serde_json::to_value(&w.doc).unwrap();
        assert_eq!(v["source"], json!("system_auto"));
        assert_eq!(v["imageUrl"], json!("https://img/p1.jpg"));
        assert_eq!(v["normalizedTitle"], json!("sut"));
        assert_eq!(v["markets"][0]["marketName"], json!("A101"));
        assert_eq!(v["updatedAt"], json!("2026-10-14T03:00:00Z"));
        assert!(v.get("id").is_none());
    }
}
