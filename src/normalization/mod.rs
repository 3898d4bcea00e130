//! Canonicalization of upstream listings: chain codes, match titles, prices, offers.
pub mod chain;
pub mod offer;
pub mod price;
pub mod title;

pub use chain::normalize_chain;
pub use offer::{normalize_listing, normalize_offer, NormalizedListing, OfferKey, ProductOffer};
pub use price::parse_price;
pub use title::normalize_title;
