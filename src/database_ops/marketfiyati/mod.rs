//! marketfiyati price-comparison API: wire models and the paginated search client.
pub mod models;
pub mod provider;

pub use models::{RawDepot, RawListing, SearchRequest, SearchResponse};
pub use provider::{MarketFiyatiProvider, UpstreamError};
