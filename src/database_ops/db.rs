use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    types::Json,
    PgPool, Postgres, QueryBuilder,
};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::store::{ProductStore, ProductWrite};
use crate::util::env::env_flag;

/// Postgres-backed document store: one JSONB document per product id.
#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS market_prices (
        id TEXT PRIMARY KEY,
        doc JSONB NOT NULL DEFAULT '{}'::jsonb
    )";

// `||` on jsonb replaces top-level keys present on the right and keeps the rest.
const UPSERT_CONFLICT_SQL: &str =
    " ON CONFLICT (id) DO UPDATE SET doc = market_prices.doc || EXCLUDED.doc";

// Other writers may store anything under `updatedAt`; only RFC3339-shaped
// strings reach the cast, everything else is never stale.
const STALE_IDS_SQL: &str = r"SELECT id FROM market_prices
     WHERE CASE
         WHEN jsonb_typeof(doc->'updatedAt') = 'string'
          AND doc->>'updatedAt' ~ '^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}(:?\d{2})?)$'
         THEN (doc->>'updatedAt')::timestamptz <= $1
         ELSE false
     END";

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options =
            PgConnectOptions::from_str(database_url).context("parsing database URL")?;

        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        if !env_flag("USE_PREPARED", false) {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await
            .context("connecting to database")?;
        info!("connected to db");
        Ok(Self { pool })
    }

    /// Create the collection table when missing. Never alters an existing one.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .context("ensuring market_prices table")?;
        Ok(())
    }
}

#[async_trait]
impl ProductStore for Db {
    async fn existing_ids(&self) -> Result<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM market_prices")
            .persistent(false)
            .fetch_all(&self.pool)
            .await
            .context("listing stored product ids")?;
        Ok(ids.into_iter().collect())
    }

    async fn commit_batch(&self, batch: &[ProductWrite]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.context("opening batch transaction")?;
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO market_prices (id, doc) ");
        qb.push_values(batch, |mut row, w| {
            row.push_bind(w.id.clone()).push_bind(Json(w.doc.clone()));
        });
        qb.push(UPSERT_CONFLICT_SQL);
        qb.build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("upserting product batch")?;
        tx.commit().await.context("committing product batch")?;
        debug!(size = batch.len(), "product batch committed");
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT count(*) FROM market_prices")
            .persistent(false)
            .fetch_one(&self.pool)
            .await
            .context("counting stored products")
    }

    async fn delete_updated_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64> {
        let stale: Vec<String> = sqlx::query_scalar(STALE_IDS_SQL)
            .persistent(false)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .context("selecting stale products")?;

        let mut deleted = 0u64;
        for chunk in stale.chunks(batch_size.max(1)) {
            let res = sqlx::query("DELETE FROM market_prices WHERE id = ANY($1)")
                .persistent(false)
                .bind(chunk.to_vec())
                .execute(&self.pool)
                .await
                .with_context(|| format!("deleting stale batch after {deleted} rows"))?;
            deleted += res.rows_affected();
            info!(deleted, total = stale.len(), "stale product batch deleted");
        }
        Ok(deleted)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, bool>("SELECT true")
            .persistent(false)
            .fetch_one(&self.pool)
            .await
            .context("database ping")?;
        Ok(())
    }
}
