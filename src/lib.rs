pub mod aggregator;
pub mod api;
pub mod config;
pub mod crawler;
pub mod database_ops;
pub mod logging;
pub mod normalization;
pub mod orchestrator;
pub mod scheduler;

pub mod util {
    pub mod env;
}
