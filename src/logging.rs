use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

use crate::util::env::init_env;

/// Default filter when `RUST_LOG` is unset: our crate at info, sqlx quiet.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

// `.env` is loaded first so a `RUST_LOG` kept there applies.
fn env_filter(default_filter: &str) -> EnvFilter {
    init_env();
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Sets up the global tracing subscriber with a fmt formatter and env filter.
///
/// The caller provides a fallback filter string that is used when `RUST_LOG` is
/// not set. This helper ensures all binaries share the same formatting rules.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    SubscriberBuilder::default()
        .with_env_filter(env_filter(default_filter))
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
