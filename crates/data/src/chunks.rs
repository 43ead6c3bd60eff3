//! Bounded-size transfer of tables between the warehouse and memory
//!
//! Reads are modelled as a lazy, finite, restartable sequence of [`Chunk`]s
//! pulled from a [`ChunkSource`]; the sequence ends on the first short or
//! empty chunk. Writes push a table in slices to a [`TableSink`], truncating
//! the target with the first slice and appending the rest.

use crate::{
    errors::{DataError, Result},
    table::{Row, Schema, Table},
    warehouse::TableRef,
};
use tracing::{debug, info};

/// A contiguous slice of a larger result, tagged with its starting offset
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub offset: usize,
    pub rows: Vec<Row>,
}

/// Anything that can serve consecutive row slices of one result
pub trait ChunkSource {
    /// Rows `[offset, offset + limit)` of the result; fewer (or none) at the end
    fn read_chunk(&self, offset: usize, limit: usize) -> Result<Vec<Row>>;
}

impl<F> ChunkSource for F
where
    F: Fn(usize, usize) -> Result<Vec<Row>>,
{
    fn read_chunk(&self, offset: usize, limit: usize) -> Result<Vec<Row>> {
        self(offset, limit)
    }
}

/// Iterator over the chunks of a [`ChunkSource`]
pub struct Chunks<'a, S: ChunkSource + ?Sized> {
    source: &'a S,
    chunk_size: usize,
    offset: usize,
    done: bool,
}

impl<'a, S: ChunkSource + ?Sized> Chunks<'a, S> {
    pub fn new(source: &'a S, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(DataError::InvalidChunkSize);
        }
        Ok(Self {
            source,
            chunk_size,
            offset: 0,
            done: false,
        })
    }

    /// Offset of the next chunk to be requested
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Start over from the first row
    pub fn restart(&mut self) {
        self.offset = 0;
        self.done = false;
    }
}

impl<S: ChunkSource + ?Sized> Iterator for Chunks<'_, S> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let rows = match self.source.read_chunk(self.offset, self.chunk_size) {
            Ok(rows) => rows,
            Err(err) => {
                self.done = true;
                return Some(Err(err));
            }
        };

        if rows.len() > self.chunk_size {
            self.done = true;
            return Some(Err(DataError::RemoteUnavailable(format!(
                "source returned {} rows for a chunk of {}",
                rows.len(),
                self.chunk_size
            ))));
        }
        if rows.is_empty() {
            self.done = true;
            return None;
        }
        if rows.len() < self.chunk_size {
            self.done = true;
        }

        let chunk = Chunk {
            offset: self.offset,
            rows,
        };
        self.offset += chunk.rows.len();
        Some(Ok(chunk))
    }
}

/// Pull every chunk of `source` and assemble them, in order, into one table.
///
/// Any failing chunk aborts the whole read; no partial table is returned.
pub fn fetch_chunks<S: ChunkSource + ?Sized>(
    source: &S,
    schema: &Schema,
    chunk_size: usize,
) -> Result<Table> {
    let mut table = Table::empty(schema.clone());
    for chunk in Chunks::new(source, chunk_size)? {
        let chunk = chunk?;
        debug!(offset = chunk.offset, rows = chunk.rows.len(), "fetched chunk");
        table.append(chunk.rows)?;
    }
    info!(rows = table.len(), chunk_size, "assembled table from chunks");
    Ok(table)
}

/// How a chunk write treats existing target contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace whatever the target holds
    Truncate,
    /// Add rows after the existing ones
    Append,
}

/// Anything that accepts row slices for a named table
pub trait TableSink {
    fn write_chunk(
        &self,
        target: &TableRef,
        schema: &Schema,
        rows: &[Row],
        mode: WriteMode,
    ) -> Result<()>;
}

/// Push `table` to `target` in slices of `chunk_size` rows.
///
/// The first slice is written with `mode`, every later slice appends. With
/// [`WriteMode::Truncate`] an empty table still clears the target. Returns the
/// number of slices written. A failure part way leaves the target partially
/// written; callers redo the whole write.
pub fn write_chunks<S: TableSink + ?Sized>(
    sink: &S,
    table: &Table,
    target: &TableRef,
    chunk_size: usize,
    mode: WriteMode,
) -> Result<usize> {
    if chunk_size == 0 {
        return Err(DataError::InvalidChunkSize);
    }

    if table.is_empty() {
        if mode == WriteMode::Truncate {
            sink.write_chunk(target, table.schema(), &[], WriteMode::Truncate)?;
            return Ok(1);
        }
        return Ok(0);
    }

    let mut written = 0;
    for (idx, rows) in table.rows().chunks(chunk_size).enumerate() {
        let chunk_mode = if idx == 0 { mode } else { WriteMode::Append };
        sink.write_chunk(target, table.schema(), rows, chunk_mode)?;
        debug!(table = %target, chunk = idx, rows = rows.len(), mode = ?chunk_mode, "wrote chunk");
        written += 1;
    }
    info!(table = %target, rows = table.len(), chunks = written, "table written");
    Ok(written)
}
