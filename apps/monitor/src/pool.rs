use std::path::Path;

use deadpool::managed::{self, Pool, RecycleResult};
use libsql::{Connection, Database, Error as LibsqlError};

use crate::database::StoreError;

/// Connections are cheap for a local file, the cap only bounds concurrent
/// interval lookups from probe tasks.
const MAX_CONNECTIONS: usize = 8;

pub struct LibsqlManager {
    database: Database,
}

impl LibsqlManager {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

impl managed::Manager for LibsqlManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        self.database.connect()
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &managed::Metrics,
    ) -> RecycleResult<Self::Error> {
        conn.query("SELECT 1", ()).await?.next().await?.ok_or(LibsqlError::QueryReturnedNoRows)?;
        Ok(())
    }
}

pub type LibsqlPool = Pool<LibsqlManager>;

/// Open (or create) the local database file and wrap it in a pool.
pub async fn open(path: &Path) -> Result<LibsqlPool, StoreError> {
    let database = libsql::Builder::new_local(path).build().await?;
    Pool::builder(LibsqlManager::new(database))
        .max_size(MAX_CONNECTIONS)
        .build()
        .map_err(|e| StoreError::Pool(e.to_string()))
}
