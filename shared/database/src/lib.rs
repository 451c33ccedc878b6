//! Postgres access layer for the Certa lot lifecycle engine: connection
//! pool, schema bootstrap, typed repositories, and the Postgres-backed
//! implementations of the engine's persistence and audit ports.

pub mod migrations;
pub mod postgres;
pub mod repositories;
pub mod store;

pub use postgres::{create_postgres_pool, health_check as postgres_health_check, PostgresPool};
pub use repositories::*;
pub use store::{PgAuditSink, PgLifecycleStore};

use anyhow::Result;
use certa_utils::DatabaseConfig;

/// Connects the pool and brings the schema up to date
pub async fn initialize_database(config: &DatabaseConfig) -> Result<PostgresPool> {
    let pool = create_postgres_pool(config).await?;
    migrations::run_postgres_migrations(&pool).await?;
    Ok(pool)
}
