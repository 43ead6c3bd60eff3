//! Cache-first table ingestion
//!
//! A request is served from the [`LocalCacheStore`] when an entry exists for
//! its key; otherwise the caller's fetch function runs once, and its complete
//! result is written to the cache before it is handed back. A failed fetch
//! writes nothing, so a later request never hits a truncated entry.

use crate::{
    cache::LocalCacheStore,
    cache_key::CacheKey,
    chunks::{fetch_chunks, ChunkSource},
    errors::{DataError, Result},
    table::{Schema, Table},
};
use tracing::{info, instrument, warn};

/// Decides between the local cache and the remote store for each request
#[derive(Debug, Clone)]
pub struct IngestionOrchestrator {
    cache: LocalCacheStore,
}

impl IngestionOrchestrator {
    pub fn new(cache: LocalCacheStore) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &LocalCacheStore {
        &self.cache
    }

    /// Return the table for `key`, calling `fetch` only on a cache miss.
    ///
    /// `schema` selects the header policy of the cache file and must match
    /// the key's table kind. With `allow_remote` unset a miss is reported as
    /// [`DataError::NotCached`] instead of calling `fetch`. A cache file that
    /// does not parse is treated as a miss and replaced by the fetched table.
    #[instrument(skip(self, key, fetch, schema), fields(key = %key))]
    pub fn get_table<F>(
        &self,
        key: &CacheKey,
        fetch: F,
        schema: &Schema,
        allow_remote: bool,
    ) -> Result<Table>
    where
        F: FnOnce() -> Result<Table>,
    {
        if schema.kind() != key.kind() {
            return Err(DataError::Schema(format!(
                "{} schema requested for {} cache key",
                schema.kind(),
                key.kind()
            )));
        }

        let corrupt = match self.cache.load(key, schema) {
            Ok(Some(table)) => {
                info!(rows = table.len(), "loaded table from local cache");
                return Ok(table);
            }
            Ok(None) => None,
            Err(err @ DataError::CacheCorrupt { .. }) => {
                warn!(error = %err, "ignoring unreadable cache entry");
                Some(err)
            }
            Err(err) => return Err(err),
        };

        if !allow_remote {
            return Err(corrupt.unwrap_or_else(|| DataError::NotCached(key.to_string())));
        }

        info!("cache miss, fetching from remote store");
        let table = fetch()?;
        if table.schema() != schema {
            return Err(DataError::Schema(format!(
                "fetched table for {key} does not match the requested schema"
            )));
        }

        let path = self.cache.store(key, &table)?;
        if table.is_empty() {
            warn!("remote store returned no rows");
        }
        info!(rows = table.len(), path = %path.display(), "cached remote table");
        Ok(table)
    }

    /// [`Self::get_table`] with the fetch wired to a chunked read of `source`
    pub fn get_chunked_table<S: ChunkSource + ?Sized>(
        &self,
        key: &CacheKey,
        schema: &Schema,
        source: &S,
        chunk_size: usize,
    ) -> Result<Table> {
        self.get_table(key, || fetch_chunks(source, schema, chunk_size), schema, true)
    }
}
