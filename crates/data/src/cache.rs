//! Local CSV cache of warehouse query results
//!
//! One file per [`CacheKey`], laid out as `<root>/raw/query_*.csv` and
//! `<root>/processed/processed_*.csv`. Raw files carry a header row with the
//! exact column names; processed files are headerless. Writes go to a
//! temporary file in the destination directory and are renamed into place.

use crate::{
    cache_key::CacheKey,
    errors::{DataError, Result},
    table::{Schema, Table},
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Filesystem-backed table cache
#[derive(Debug, Clone)]
pub struct LocalCacheStore {
    root: PathBuf,
}

impl LocalCacheStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the cache file for `key`
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.kind().as_str()).join(key.file_name())
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Load the cached table for `key`, or `None` if nothing is cached.
    ///
    /// A file that does not parse against `schema` yields
    /// [`DataError::CacheCorrupt`].
    pub fn load(&self, key: &CacheKey, schema: &Schema) -> Result<Option<Table>> {
        let path = self.path_for(key);
        if !path.is_file() {
            return Ok(None);
        }

        let corrupt = |reason: String| DataError::CacheCorrupt {
            path: path.clone(),
            reason,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(schema.has_header())
            .from_path(&path)?;

        if schema.has_header() {
            let headers = reader.headers().map_err(|e| corrupt(e.to_string()))?;
            let found: Vec<&str> = headers.iter().collect();
            if found != schema.column_names() {
                return Err(corrupt(format!(
                    "header {:?} does not match {:?}",
                    found,
                    schema.column_names()
                )));
            }
        }

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| corrupt(e.to_string()))?;
            let row = schema
                .decode(record.iter())
                .map_err(|reason| corrupt(format!("row {}: {reason}", line + 1)))?;
            rows.push(row);
        }

        debug!(key = %key, rows = rows.len(), "cache hit");
        Table::from_rows(schema.clone(), rows).map(Some)
    }

    /// Persist `table` under `key`, replacing any previous file atomically
    pub fn store(&self, key: &CacheKey, table: &Table) -> Result<PathBuf> {
        let path = self.path_for(key);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&dir)?;

        let mut staged = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .terminator(csv::Terminator::Any(b'\n'))
                .from_writer(staged.as_file_mut());
            if table.schema().has_header() {
                writer.write_record(table.schema().column_names())?;
            }
            for row in table.rows() {
                writer.write_record(row.iter().map(ToString::to_string))?;
            }
            writer.flush()?;
        }
        staged.as_file_mut().sync_all()?;
        staged.persist(&path).map_err(|e| DataError::Io(e.error))?;

        debug!(key = %key, rows = table.len(), path = %path.display(), "cached table");
        Ok(path)
    }

    /// Raw bytes of a cached file, used to compare cache contents
    pub fn read_bytes(&self, key: &CacheKey) -> Result<Vec<u8>> {
        Ok(fs::read(self.path_for(key))?)
    }
}
