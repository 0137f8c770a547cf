use async_trait::async_trait;
use libsql::params;
use tracing::warn;

use super::StoreError;
use super::models::Target;
use crate::pool::{LibsqlManager, LibsqlPool};

/// Durable mapping from target url to probe interval.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Insert the target, or replace the interval of an existing row.
    async fn upsert(&self, target: &Target) -> Result<(), StoreError>;

    /// Remove the target. Returns false when no row existed.
    async fn delete(&self, url: &str) -> Result<bool, StoreError>;

    /// Current interval for `url`, if it is stored.
    async fn interval_seconds(&self, url: &str) -> Result<Option<u64>, StoreError>;

    /// Every stored target.
    async fn targets(&self) -> Result<Vec<Target>, StoreError>;
}

/// LibSQL implementation
pub struct LibsqlTargetStore {
    pool: LibsqlPool,
}

impl LibsqlTargetStore {
    pub fn new(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>, StoreError> {
        self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))
    }
}

fn positive_interval(url: &str, interval: i64) -> Result<u64, StoreError> {
    match u64::try_from(interval) {
        Ok(seconds) if seconds > 0 => Ok(seconds),
        _ => Err(StoreError::CorruptInterval { url: url.to_string(), interval }),
    }
}

#[async_trait]
impl TargetStore for LibsqlTargetStore {
    async fn upsert(&self, target: &Target) -> Result<(), StoreError> {
        let interval = i64::try_from(target.interval_seconds).map_err(|_| StoreError::IntervalOutOfRange {
            url: target.url.clone(),
            interval: target.interval_seconds,
        })?;

        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO monitored_sites (url, interval) VALUES (?1, ?2)
             ON CONFLICT(url) DO UPDATE SET interval = excluded.interval",
            params![target.url.clone(), interval],
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<bool, StoreError> {
        let conn = self.get_conn().await?;
        let affected =
            conn.execute("DELETE FROM monitored_sites WHERE url = ?1", params![url.to_string()]).await?;
        Ok(affected > 0)
    }

    async fn interval_seconds(&self, url: &str) -> Result<Option<u64>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT interval FROM monitored_sites WHERE url = ?1", params![url.to_string()])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(positive_interval(url, row.get::<i64>(0)?)?)),
            None => Ok(None),
        }
    }

    async fn targets(&self) -> Result<Vec<Target>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query("SELECT url, interval FROM monitored_sites ORDER BY id", ()).await?;
        let mut targets = Vec::new();

        while let Some(row) = rows.next().await? {
            let url: String = row.get(0)?;
            match positive_interval(&url, row.get::<i64>(1)?) {
                Ok(interval_seconds) => targets.push(Target { url, interval_seconds }),
                Err(e) => warn!("Skipping stored target: {}", e),
            }
        }

        Ok(targets)
    }
}
