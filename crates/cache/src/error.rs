//! Error type for the cache store

use thiserror::Error;
use trophy_cache_core::ValidationError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    /// Reconciliation left the database in a shape the code can't trust
    #[error("Schema verification failed: {}", .0.join("; "))]
    SchemaVerification(Vec<String>),

    /// An earlier open of this store failed; carries that failure's message
    #[error("Cache store could not be opened: {0}")]
    OpenFailed(String),

    #[error("Cache store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, CacheError>;
