//! Database Layer
//!
//! `PostgreSQL` and Redis connections, and the Postgres implementation of
//! the artifact, comment, subject and audit stores.

mod models;
mod queries;

use std::time::Duration;

use anyhow::{Context, Result};
use fred::prelude::{ClientLike, Config as RedisConfig};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

pub use models::*;
pub use queries::PgStore;

/// Open the `PostgreSQL` pool.
///
/// The purge job holds a single connection; the pool floor stays at one so
/// idle deployments do not keep sockets open.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect(database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Apply pending schema migrations from `server/migrations`.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("failed to apply migrations")?;
    info!("Schema up to date");
    Ok(())
}

/// Connect the Redis client backing the shared dedup and view caches.
pub async fn create_redis_client(redis_url: &str) -> Result<fred::clients::Client> {
    let config = RedisConfig::from_url(redis_url).context("invalid REDIS_URL")?;
    let client = fred::clients::Client::new(config, None, None, None);
    client.connect();
    client
        .wait_for_connect()
        .await
        .context("failed to connect to Redis")?;

    info!("Connected to Redis");
    Ok(client)
}
