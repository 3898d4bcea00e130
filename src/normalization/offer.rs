use serde::{Deserialize, Serialize};

use super::{normalize_chain, normalize_title, parse_price};
use crate::database_ops::marketfiyati::models::scalar_to_string;
use crate::database_ops::marketfiyati::{RawDepot, RawListing};

pub const DEFAULT_TITLE: &str = "İsimsiz";
pub const DEFAULT_BRAND: &str = "Markasız";

/// One (chain, branch, price) observation for a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductOffer {
    #[serde(rename = "marketName")]
    pub chain: String,
    #[serde(rename = "branchName")]
    pub branch: String,
    pub price: f64,
    pub unit_price_text: String,
}

/// Identity used to collapse exact duplicate offers. Prices compare bitwise;
/// normalized prices are always finite and positive so that is exact equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OfferKey {
    chain: String,
    branch: String,
    price_bits: u64,
}

impl ProductOffer {
    pub fn key(&self) -> OfferKey {
        OfferKey {
            chain: self.chain.clone(),
            branch: self.branch.clone(),
            price_bits: self.price.to_bits(),
        }
    }
}

/// A listing reduced to the fields we persist, with its valid offers.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedListing {
    pub id: String,
    pub title: String,
    pub brand: String,
    pub image_url: String,
    pub normalized_title: String,
    pub offers: Vec<ProductOffer>,
}

/// Canonicalize one branch entry. `None` when the price is not a positive number.
pub fn normalize_offer(raw: &RawDepot) -> Option<ProductOffer> {
    let price = parse_price(raw.price.as_ref()?)?;
    Some(ProductOffer {
        chain: normalize_chain(raw.market_name.as_deref().unwrap_or_default()),
        branch: raw.depot_name.clone().unwrap_or_default(),
        price,
        unit_price_text: raw
            .unit_price
            .as_ref()
            .and_then(scalar_to_string)
            .unwrap_or_default(),
    })
}

/// Canonicalize a whole listing. Listings without an id or without a single
/// valid offer carry nothing worth storing and yield `None`.
pub fn normalize_listing(raw: &RawListing) -> Option<NormalizedListing> {
    let id = raw.product_id()?;
    let offers: Vec<ProductOffer> = raw.depots().iter().filter_map(normalize_offer).collect();
    if offers.is_empty() {
        return None;
    }

    let raw_title = raw.title.as_deref().unwrap_or_default();
    let title = match raw_title.trim() {
        "" => DEFAULT_TITLE.to_string(),
        t => t.to_string(),
    };
    let brand = match raw.brand.as_deref().map(str::trim) {
        Some(b) if !b.is_empty() => b.to_string(),
        _ => DEFAULT_BRAND.to_string(),
    };

    Some(NormalizedListing {
        id,
        normalized_title: normalize_title(raw_title),
        title,
        brand,
        image_url: raw.image_url.clone().unwrap_or_default(),
        offers,
    })
}
