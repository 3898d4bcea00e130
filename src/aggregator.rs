//! In-memory merge of crawled listings, keyed by upstream product id.
//!
//! Each category crawler owns one `Aggregator`; the orchestrator folds them
//! together after every fan-out join with `absorb`, so no map is ever shared
//! between tasks.
use indexmap::map::Entry;
use indexmap::IndexMap;
use std::collections::HashSet;

use crate::normalization::{NormalizedListing, ProductOffer};

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedProduct {
    pub id: String,
    pub title: String,
    pub brand: String,
    pub image_url: String,
    /// Category of the first sighting in this run.
    pub category: String,
    pub normalized_title: String,
    pub offers: Vec<ProductOffer>,
}

impl AggregatedProduct {
    fn from_listing(category: &str, listing: NormalizedListing) -> Self {
        Self {
            id: listing.id,
            title: listing.title,
            brand: listing.brand,
            image_url: listing.image_url,
            category: category.to_string(),
            normalized_title: listing.normalized_title,
            offers: listing.offers,
        }
    }

    /// Later sighting: scalar fields take the newest value, offers accumulate,
    /// category stays put.
    fn update_from(&mut self, newer: AggregatedProduct) {
        self.title = newer.title;
        self.brand = newer.brand;
        self.image_url = newer.image_url;
        self.normalized_title = newer.normalized_title;
        self.offers.extend(newer.offers);
    }
}

/// Collapse offers that share (chain, branch, price), keeping the first
/// occurrence and the original order. Idempotent.
pub fn dedup_offers(offers: Vec<ProductOffer>) -> Vec<ProductOffer> {
    let mut seen = HashSet::with_capacity(offers.len());
    offers.into_iter().filter(|o| seen.insert(o.key())).collect()
}

#[derive(Debug, Default)]
pub struct Aggregator {
    products: IndexMap<String, AggregatedProduct>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&AggregatedProduct> {
        self.products.get(id)
    }

    /// Raw offer count before dedup.
    pub fn offer_count(&self) -> usize {
        self.products.values().map(|p| p.offers.len()).sum()
    }

    pub fn merge(&mut self, category: &str, listing: NormalizedListing) {
        self.upsert(AggregatedProduct::from_listing(category, listing));
    }

    fn upsert(&mut self, product: AggregatedProduct) {
        match self.products.entry(product.id.clone()) {
            Entry::Occupied(mut e) => e.get_mut().update_from(product),
            Entry::Vacant(e) => {
                e.insert(product);
            }
        }
    }

    /// Fold a partial aggregate (typically one category's) into this one.
    /// Products already present keep their category.
    pub fn absorb(&mut self, other: Aggregator) {
        for product in other.products.into_values() {
            self.upsert(product);
        }
    }

    /// Consume the aggregate, deduplicating each product's offers.
    /// Products come out in first-sighting order.
    pub fn finalize(self) -> Vec<AggregatedProduct> {
        self.products
            .into_values()
            .map(|mut p| {
                p.offers = dedup_offers(std::mem::take(&mut p.offers));
                p
            })
            .collect()
    }
}
