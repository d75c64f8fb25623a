//! Result store for probe results, target states and transitions
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database with WAL mode and migrations
//! - **In-Memory**: No persistence, for tests and the `"none"` backend
//!
//! ## Usage
//!
//! ```no_run
//! use net_monitoring::storage::{ResultStore, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./monitoring.db").await?;
//!     let states = store.load_states().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod retry;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

pub use backend::{HealthStatus, HistoryQuery, ResultStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use retry::RetryPolicy;
pub use schema::UptimeStats;

use crate::config::StorageConfig;

/// Open the backend selected by `config`
pub async fn open_store(config: &StorageConfig) -> StorageResult<Arc<dyn ResultStore>> {
    match config {
        StorageConfig::None => {
            info!("using in-memory result store (no persistence)");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => Ok(Arc::new(sqlite::SqliteStore::new(path).await?)),
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::Unsupported("SQLite")),
    }
}
