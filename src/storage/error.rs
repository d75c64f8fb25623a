//! Failures of the result store
//!
//! Writes that fail with one of these are retried by the engine
//! (see [`super::retry`]); reads hand them to the caller.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    /// The database file could not be opened or created
    #[cfg(feature = "storage-sqlite")]
    #[error("cannot open result store at {path}")]
    Open {
        path: String,
        #[source]
        source: sqlx::Error,
    },

    #[cfg(feature = "storage-sqlite")]
    #[error("result store schema migration failed")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A statement failed (locked database, full disk, constraint)
    #[error("result store query failed: {0}")]
    Query(String),

    /// A stored column holds a value this version does not understand
    #[error("stored {column} '{value}' cannot be decoded")]
    Decode { column: &'static str, value: String },

    #[error("stored metrics are not valid JSON")]
    Metrics(#[from] serde_json::Error),

    #[error("result store is closed")]
    Closed,

    #[error("{0} storage is not compiled in")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub(crate) fn decode(column: &'static str, value: impl ToString) -> Self {
        StorageError::Decode {
            column,
            value: value.to_string(),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::Io(io_err),
            sqlx::Error::PoolClosed => StorageError::Closed,
            _ => StorageError::Query(err.to_string()),
        }
    }
}
