//! Durable snapshot storage.
//!
//! The relational store is the guaranteed source of truth: every captured
//! snapshot lands here unconditionally, as an ordered-by-timestamp history
//! per user, rotated down to a configured number of unpinned entries.

#[cfg(feature = "sqlite")]
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(feature = "sqlite")]
use tracing::info;
use uuid::Uuid;

use crate::adapter::AdapterError;
#[cfg(feature = "sqlite")]
use crate::adapter::DataAdapter;
#[cfg(feature = "sqlite")]
use crate::config::{Config, StorageType};
use crate::snapshot::{Snapshot, User};

pub mod mock;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use mock::MockDatabase;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("invalid uuid: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("snapshot adaption failed: {0}")]
    Adapter(#[from] AdapterError),

    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Interface for snapshot history persistence.
///
/// All operations are keyed by user uuid and/or snapshot version uuid.
/// Connectivity failures surface as errors and are not retried here; retry
/// policy, where one exists, belongs to the caller.
///
/// Implementations:
/// - `SqliteDatabase`: SQLite storage
/// - `MockDatabase`: in-memory mock for testing
#[async_trait]
pub trait Database: Send + Sync {
    /// Upsert a user identity row, refreshing the display name.
    async fn ensure_user(&self, uuid: Uuid, username: &str) -> Result<()>;

    /// Retrieve a user identity by uuid.
    async fn get_user(&self, uuid: Uuid) -> Result<Option<User>>;

    /// Retrieve a user identity by current username.
    async fn get_user_by_name(&self, username: &str) -> Result<Option<User>>;

    /// Retrieve a user's most recent snapshot.
    async fn get_latest_snapshot(&self, user: Uuid) -> Result<Option<Snapshot>>;

    /// Retrieve a user's full snapshot history, most recent first.
    async fn get_all_snapshots(&self, user: Uuid) -> Result<Vec<Snapshot>>;

    /// Retrieve one snapshot by version uuid.
    async fn get_snapshot(&self, user: Uuid, version: Uuid) -> Result<Option<Snapshot>>;

    /// Insert a snapshot, then rotate the user's history: among unpinned
    /// snapshots ordered newest-first, everything beyond the configured cap
    /// is deleted. Pinned snapshots are excluded from the count and from the
    /// deletion candidates.
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    /// Overwrite an existing version in place. Editor tooling only; the
    /// normal sync flow always inserts new versions.
    async fn update_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    /// Delete one snapshot. Returns whether a row existed.
    async fn delete_snapshot(&self, user: Uuid, version: Uuid) -> Result<bool>;

    /// Exempt a snapshot from rotation.
    async fn pin_snapshot(&self, user: Uuid, version: Uuid) -> Result<()>;

    /// Make a snapshot eligible for rotation again.
    async fn unpin_snapshot(&self, user: Uuid, version: Uuid) -> Result<()>;

    /// Wipe a user's entire snapshot history, pinned rows included.
    async fn delete_all_snapshots(&self, user: Uuid) -> Result<()>;
}

/// Initialize the durable store from configuration.
#[cfg(feature = "sqlite")]
pub async fn init_storage(
    config: &Config,
    adapter: Arc<dyn DataAdapter>,
) -> std::result::Result<Arc<dyn Database>, Box<dyn std::error::Error>> {
    match config.storage.storage_type {
        StorageType::Sqlite => {
            let path = &config.storage.sqlite.path;
            info!(path = %path, "Storage: sqlite");

            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }

            let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", path)).await?;

            let database = Arc::new(SqliteDatabase::new(
                pool,
                adapter,
                config.synchronization.max_user_data_snapshots,
            ));
            database.init().await?;

            Ok(database)
        }
    }
}
