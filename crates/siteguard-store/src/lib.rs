//! Persistence layer for siteguardd
//!
//! Provides:
//! - Key/value records (`rules`, `usage-<date>`, `operationMode`, ...)
//! - Typed accessors for every persisted key
//! - Host usage records with minute/second carry
//! - Audit log (append-only)

mod audit;
mod records;
mod sqlite;
mod traits;

pub use audit::*;
pub use records::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
