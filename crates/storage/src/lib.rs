//! SeaORM-backed storage adapters that satisfy the domain storage traits while
//! keeping the database backend swappable (SQLite by default, PostgreSQL via
//! feature flag).

mod builder;
mod channel_store;
mod entity;
mod key_store;
mod migration;
mod sale_store;
mod settings_store;
mod user_store;
mod waitlist_store;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use keydrop_domain::storage::{StorageError, StorageResult};
use migration::run_migrations;
use sea_orm::{Database, DatabaseConnection};

pub use builder::StorageBuilder;

/// Shared storage handle used by the engine, the transport workers and the
/// health endpoint.
#[derive(Clone)]
pub struct SeaOrmStorage {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmStorage {
    /// Connects to the provided database URL and ensures the schema is present.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let db = Database::connect(database_url)
            .await
            .map_err(StorageError::from_source)?;
        Self::from_connection(db).await
    }

    pub fn builder() -> StorageBuilder {
        StorageBuilder::new()
    }

    pub(crate) async fn from_connection(db: DatabaseConnection) -> StorageResult<Self> {
        run_migrations(&db).await?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }
}
