use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::config::AppConfig;

/// Initialize PostgreSQL connection pool
///
/// The acquire timeout bounds how long any store call can wait for a
/// connection; exceeding it surfaces as an unavailable store.
pub async fn init_pool(config: &AppConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(config.db_acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

pub mod memory;
pub mod pg_store;
pub mod queries;
