pub mod db;
pub mod market_prices;
pub mod marketfiyati;
pub mod memory_store;
pub mod store;
