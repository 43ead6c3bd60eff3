//! Taxifare data layer
//!
//! Moves ride tables between the warehouse and the trainer while keeping the
//! number of remote round trips to a minimum:
//! - [`IngestionOrchestrator`] serves each date-bounded request from the
//!   [`LocalCacheStore`] and falls back to the warehouse only on a miss
//! - [`fetch_chunks`] / [`write_chunks`] move tables in bounded slices
//! - [`Warehouse`] is the embedded tabular store behind both
//! - [`TrainingSplit`] cuts a time-ordered table for training

pub mod cache;
pub mod cache_key;
pub mod chunks;
pub mod errors;
pub mod ingest;
pub mod split;
pub mod table;
pub mod warehouse;

pub use cache::LocalCacheStore;
pub use cache_key::{normalize_date, CacheKey};
pub use chunks::{fetch_chunks, write_chunks, Chunk, ChunkSource, Chunks, TableSink, WriteMode};
pub use errors::{DataError, Result};
pub use ingest::IngestionOrchestrator;
pub use split::{TrainingSplit, DEFAULT_SPLIT_RATIO};
pub use table::{
    parse_timestamp, Column, ColumnType, Row, Schema, Table, TableKind, Value, RAW_COLUMNS,
    TIMESTAMP_COLUMN,
};
pub use warehouse::{Query, QueryCursor, TableRef, Warehouse};
