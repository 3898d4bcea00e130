// Standalone status API server binary

use anyhow::Result;
use market_prices::api::ApiServer;
use market_prices::database_ops::db::Db;
use market_prices::database_ops::store::ProductStore;
use market_prices::logging::{init_tracing, DEFAULT_FILTER};
use market_prices::util::env as env_util;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing(DEFAULT_FILTER)?;

    let server = ApiServer::from_env()?;

    let database_url = env_util::db_url()?;
    let db = Db::connect(&database_url, 5).await?;
    db.ensure_schema().await?;
    let store: Arc<dyn ProductStore> = Arc::new(db);

    server.run(store).await
}
