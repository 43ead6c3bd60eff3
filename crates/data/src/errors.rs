//! Error types for the ingestion layer

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while moving tables between the warehouse and the cache
#[derive(Error, Debug)]
pub enum DataError {
    /// The warehouse could not be reached or rejected the request
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// A cached file does not parse against its declared schema
    #[error("Corrupt cache file {path}: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    /// The caller forbade remote access and the key is not cached
    #[error("No cached table for key {0} and remote access is disabled")]
    NotCached(String),

    /// A row does not match the schema it is declared against
    #[error("Schema mismatch: {0}")]
    Schema(String),

    /// The requested table does not exist in the warehouse
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Chunk sizes must be at least one row
    #[error("Chunk size must be at least 1")]
    InvalidChunkSize,

    /// A date string could not be interpreted
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// Split ratio outside `[0, 1)`
    #[error("Invalid split ratio: {0}")]
    InvalidSplitRatio(f64),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Warehouse storage failures surface as an unavailable remote store
impl From<sled::Error> for DataError {
    fn from(err: sled::Error) -> Self {
        DataError::RemoteUnavailable(err.to_string())
    }
}

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, DataError>;
