/// Durable target store
///
/// The `monitored_sites` table is the source of truth for what should be
/// probed; the in-memory monitor registry is rebuilt from it on startup.

pub mod migrations;
pub mod models;
pub mod repository;

pub use models::Target;
pub use repository::{LibsqlTargetStore, TargetStore};

use thiserror::Error;

use crate::pool::LibsqlPool;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("stored interval {interval} for {url} is not a positive number of seconds")]
    CorruptInterval { url: String, interval: i64 },
    #[error("interval {interval} for {url} does not fit the interval column")]
    IntervalOutOfRange { url: String, interval: u64 },
}

/// Initialize database with schema
pub async fn initialize_database(pool: &LibsqlPool) -> Result<(), StoreError> {
    let conn = pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
    migrations::run_migrations(&conn).await
}
