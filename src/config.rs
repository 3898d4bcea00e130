//! Pipeline configuration.
//!
//! Every timing and sizing knob of the ingestion run lives here. The defaults
//! mirror what the upstream price API tolerates in practice; each one can be
//! overridden through the environment (see `IngestConfig::from_env`).
use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use rand::Rng;
use std::time::Duration;

use crate::util::env::{env_list, env_opt, env_parse, env_parse_opt};

pub const DEFAULT_API_URL: &str = "https://api.marketfiyati.org.tr/api/v2/searchByCategories";

/// Categories crawled on every run, in fan-out order.
pub const DEFAULT_CATEGORIES: [&str; 7] = [
    "Meyve ve Sebze",
    "Et, Tavuk ve Balık",
    "Süt Ürünleri ve Kahvaltılık",
    "Temel Gıda",
    "İçecek",
    "Atıştırmalık ve Tatlı",
    "Temizlik ve Kişisel Bakım Ürünleri",
];

/// Hard per-batch operation ceiling of the store.
pub const MAX_BATCH_OPS: usize = 500;
/// Batch size used by default; leaves headroom under `MAX_BATCH_OPS`.
pub const DEFAULT_BATCH_SIZE: usize = 400;

/// Wednesdays 06:00, evaluated in `ScheduleConfig::timezone` (Europe/Istanbul).
pub const DEFAULT_CRON: &str = "0 0 6 * * Wed";

/// Bounded retry schedule for a single page request.
///
/// Attempt `n` (0-based) that fails is followed by a pause of
/// `base_delay + n * step` before attempt `n + 1`. Nothing is slept after the
/// final attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(5_000),
            step: Duration::from_millis(4_000),
        }
    }
}

impl RetryPolicy {
    /// Zero-delay policy with the given ceiling; used by tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            step: Duration::ZERO,
        }
    }

    /// Pause after failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay + self.step.saturating_mul(attempt)
    }

    fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_attempts: env_parse("MARKET_RETRY_ATTEMPTS", d.max_attempts).max(1),
            base_delay: Duration::from_millis(env_parse(
                "MARKET_RETRY_BASE_MS",
                d.base_delay.as_millis() as u64,
            )),
            step: Duration::from_millis(env_parse(
                "MARKET_RETRY_STEP_MS",
                d.step.as_millis() as u64,
            )),
        }
    }
}

/// Randomized pause between two page requests of the same category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDelay {
    pub min: Duration,
    pub max: Duration,
}

impl Default for PageDelay {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(4_500),
            max: Duration::from_millis(7_000),
        }
    }
}

impl PageDelay {
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Uniform sample from `[min, max]`; tolerates a swapped window.
    pub fn sample(&self) -> Duration {
        let (lo, hi) = if self.min <= self.max {
            (self.min, self.max)
        } else {
            (self.max, self.min)
        };
        if lo == hi {
            return lo;
        }
        let ms = rand::thread_rng().gen_range(lo.as_millis() as u64..=hi.as_millis() as u64);
        Duration::from_millis(ms)
    }
}

/// Request shape for the upstream search endpoint.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Requested page size; the upstream may return fewer.
    pub page_size: u32,
    /// The upstream requires a location even though results are not geo-filtered.
    pub latitude: f64,
    pub longitude: f64,
    pub distance: u32,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            page_size: 100,
            latitude: 39.9208,
            longitude: 32.8541,
            distance: 2000,
            request_timeout: Duration::from_secs(25),
            retry: RetryPolicy::default(),
        }
    }
}

impl UpstreamConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            base_url: env_opt("MARKET_API_URL").unwrap_or(d.base_url),
            page_size: env_parse("MARKET_PAGE_SIZE", d.page_size).max(1),
            latitude: env_parse("MARKET_LATITUDE", d.latitude),
            longitude: env_parse("MARKET_LONGITUDE", d.longitude),
            distance: env_parse("MARKET_DISTANCE", d.distance),
            request_timeout: Duration::from_secs(env_parse(
                "MARKET_TIMEOUT_SECS",
                d.request_timeout.as_secs(),
            )),
            retry: RetryPolicy::from_env(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Six-field cron expression (seconds first).
    pub cron: String,
    pub timezone: Tz,
    /// Ceiling for one whole run; the run is abandoned past it.
    pub run_timeout: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: DEFAULT_CRON.to_string(),
            timezone: chrono_tz::Europe::Istanbul,
            run_timeout: Duration::from_secs(3_600),
        }
    }
}

impl ScheduleConfig {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let timezone = match env_opt("MARKET_SCHEDULE_TZ") {
            Some(raw) => raw
                .trim()
                .parse::<Tz>()
                .map_err(|e| anyhow!("invalid MARKET_SCHEDULE_TZ {raw:?}: {e}"))?,
            None => d.timezone,
        };
        Ok(Self {
            cron: env_opt("MARKET_SCHEDULE_CRON").unwrap_or(d.cron),
            timezone,
            run_timeout: Duration::from_secs(env_parse(
                "MARKET_RUN_TIMEOUT_SECS",
                d.run_timeout.as_secs(),
            )),
        })
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub upstream: UpstreamConfig,
    pub categories: Vec<String>,
    /// Categories crawled concurrently per group.
    pub concurrency: usize,
    pub page_delay: PageDelay,
    /// Optional safety cap on pages per category. The upstream has no
    /// last-page signal, an empty page is the only natural stop.
    pub max_pages: Option<u32>,
    pub batch_size: usize,
    pub schedule: ScheduleConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            concurrency: 3,
            page_delay: PageDelay::default(),
            max_pages: None,
            batch_size: DEFAULT_BATCH_SIZE,
            schedule: ScheduleConfig::default(),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let page_delay = PageDelay {
            min: Duration::from_millis(env_parse(
                "MARKET_PAGE_DELAY_MIN_MS",
                d.page_delay.min.as_millis() as u64,
            )),
            max: Duration::from_millis(env_parse(
                "MARKET_PAGE_DELAY_MAX_MS",
                d.page_delay.max.as_millis() as u64,
            )),
        };
        let cfg = Self {
            upstream: UpstreamConfig::from_env(),
            categories: env_list("MARKET_CATEGORIES").unwrap_or(d.categories),
            concurrency: env_parse("MARKET_CONCURRENCY", d.concurrency),
            page_delay,
            max_pages: env_parse_opt("MARKET_MAX_PAGES"),
            batch_size: env_parse("MARKET_BATCH_SIZE", d.batch_size),
            schedule: ScheduleConfig::from_env().context("loading schedule config")?,
        };
        Ok(cfg.sanitized())
    }

    /// Clamp values into their valid ranges.
    pub fn sanitized(mut self) -> Self {
        self.concurrency = self.concurrency.max(1);
        self.batch_size = clamp_batch_size(self.batch_size);
        self
    }
}

/// Batch size constrained to `1..=MAX_BATCH_OPS`.
pub fn clamp_batch_size(requested: usize) -> usize {
    requested.clamp(1, MAX_BATCH_OPS)
}
