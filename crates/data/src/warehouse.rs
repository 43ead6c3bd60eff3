//! Tabular warehouse backed by an embedded sled database
//!
//! Each table lives in its own sled tree named `<dataset>.<table>`. Rows of
//! tables with a `pickup_datetime` column are keyed by (timestamp, sequence),
//! so a key-order scan is the `ORDER BY pickup_datetime` of a query and a date
//! range is a key range. Other tables are keyed by insertion sequence only.

use crate::{
    chunks::{ChunkSource, TableSink, WriteMode},
    errors::{DataError, Result},
    table::{Row, Schema, TIMESTAMP_COLUMN},
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sled::{Db, Tree};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

const SCHEMA_TREE: &str = "__schemas";

/// Fully qualified table name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.dataset, self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// Projection of one table, optionally bounded by pickup date (inclusive),
/// ordered by pickup time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: TableRef,
    pub columns: Vec<String>,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

impl Query {
    /// Select `columns` (all columns when empty) from `table`
    pub fn select<I, S>(table: TableRef, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            table,
            columns: columns
                .into_iter()
                .map(|c| c.as_ref().to_string())
                .collect(),
            date_range: None,
        }
    }

    /// Keep rows whose pickup time is between the two dates, midnight to midnight
    pub fn between(mut self, min_date: NaiveDate, max_date: NaiveDate) -> Self {
        self.date_range = Some((min_date, max_date));
        self
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(",")
        };
        write!(f, "SELECT {columns} FROM {}", self.table)?;
        if let Some((min, max)) = self.date_range {
            write!(
                f,
                " WHERE {TIMESTAMP_COLUMN} BETWEEN '{}' AND '{}'",
                min.format("%Y-%m-%d"),
                max.format("%Y-%m-%d")
            )?;
        }
        write!(f, " ORDER BY {TIMESTAMP_COLUMN}")
    }
}

/// Embedded tabular store
pub struct Warehouse {
    db: Db,
    schemas: Tree,
}

impl Warehouse {
    /// Open (or create) a warehouse at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Warehouse that lives only as long as this value
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        let schemas = db.open_tree(SCHEMA_TREE)?;
        Ok(Self { db, schemas })
    }

    fn tree(&self, table: &TableRef) -> Result<Tree> {
        Ok(self.db.open_tree(table.qualified())?)
    }

    /// Stored schema of `table`, if the table exists
    pub fn schema(&self, table: &TableRef) -> Result<Option<Schema>> {
        match self.schemas.get(table.qualified())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn row_count(&self, table: &TableRef) -> Result<usize> {
        if self.schema(table)?.is_none() {
            return Err(DataError::TableNotFound(table.qualified()));
        }
        Ok(self.tree(table)?.len())
    }

    /// Rows `[offset, offset + limit)` of the query result
    pub fn read_chunk(&self, query: &Query, offset: usize, limit: usize) -> Result<Vec<Row>> {
        let schema = self
            .schema(&query.table)?
            .ok_or_else(|| DataError::TableNotFound(query.table.qualified()))?;
        let projection = projection(&schema, &query.columns)?;
        let tree = self.tree(&query.table)?;

        let entries = match (query.date_range, schema.index_of(TIMESTAMP_COLUMN)) {
            (Some((min, max)), Some(_)) => {
                let low = timestamp_prefix(&day_start(min)).to_vec();
                let mut high = timestamp_prefix(&day_start(max)).to_vec();
                high.extend_from_slice(&u64::MAX.to_be_bytes());
                tree.range(low..=high)
            }
            (Some(_), None) => {
                return Err(DataError::Schema(format!(
                    "{} has no {TIMESTAMP_COLUMN} column to filter on",
                    query.table
                )))
            }
            (None, _) => tree.iter(),
        };

        let mut rows = Vec::with_capacity(limit);
        for entry in entries.skip(offset).take(limit) {
            let (_, value) = entry?;
            let row: Row = serde_json::from_slice(&value)?;
            rows.push(projection.iter().map(|&i| row[i].clone()).collect());
        }
        debug!(query = %query, offset, rows = rows.len(), "read chunk");
        Ok(rows)
    }

    /// Cursor serving `query` chunk by chunk
    pub fn cursor<'a>(&'a self, query: &'a Query) -> QueryCursor<'a> {
        QueryCursor {
            warehouse: self,
            query,
        }
    }
}

impl TableSink for Warehouse {
    fn write_chunk(
        &self,
        target: &TableRef,
        schema: &Schema,
        rows: &[Row],
        mode: WriteMode,
    ) -> Result<()> {
        for row in rows {
            schema.check_row(row)?;
        }
        let tree = self.tree(target)?;
        let name = target.qualified();

        match mode {
            WriteMode::Truncate => {
                tree.clear()?;
                self.schemas.insert(name.as_bytes(), serde_json::to_vec(schema)?)?;
                info!(table = %target, "truncated table");
            }
            WriteMode::Append => match self.schema(target)? {
                Some(existing) if &existing != schema => {
                    return Err(DataError::Schema(format!(
                        "cannot append to {target}: schema differs from stored schema"
                    )));
                }
                Some(_) => {}
                None => {
                    self.schemas.insert(name.as_bytes(), serde_json::to_vec(schema)?)?;
                }
            },
        }

        let ts_idx = schema.index_of(TIMESTAMP_COLUMN);
        let mut batch = sled::Batch::default();
        for row in rows {
            let seq = self.db.generate_id()?;
            let mut key = Vec::with_capacity(16);
            if let Some(ts) = ts_idx.and_then(|i| row[i].as_timestamp()) {
                key.extend_from_slice(&timestamp_prefix(&ts));
            }
            key.extend_from_slice(&seq.to_be_bytes());
            batch.insert(key, serde_json::to_vec(row)?);
        }
        tree.apply_batch(batch)?;
        tree.flush()?;
        Ok(())
    }
}

/// [`ChunkSource`] over one warehouse query
pub struct QueryCursor<'a> {
    warehouse: &'a Warehouse,
    query: &'a Query,
}

impl ChunkSource for QueryCursor<'_> {
    fn read_chunk(&self, offset: usize, limit: usize) -> Result<Vec<Row>> {
        self.warehouse.read_chunk(self.query, offset, limit)
    }
}

fn projection(schema: &Schema, columns: &[String]) -> Result<Vec<usize>> {
    if columns.is_empty() {
        return Ok((0..schema.width()).collect());
    }
    columns
        .iter()
        .map(|name| {
            schema
                .index_of(name)
                .ok_or_else(|| DataError::Schema(format!("unknown column {name}")))
        })
        .collect()
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Order-preserving big-endian encoding of a timestamp
fn timestamp_prefix(ts: &DateTime<Utc>) -> [u8; 8] {
    ((ts.timestamp_micros() as u64) ^ (1 << 63)).to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::{fetch_chunks, write_chunks};
    use crate::table::{parse_timestamp, Table, Value};

    fn ride(ts: &str, fare: f64) -> Row {
        vec![
            Value::Float(fare),
            Value::Timestamp(parse_timestamp(ts).unwrap()),
            Value::Float(-73.95),
            Value::Float(40.78),
            Value::Float(-73.98),
            Value::Float(40.77),
            Value::Int(1),
        ]
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_query_renders_sql() {
        let query = Query::select(TableRef::new("public", "raw_1k"), &["fare_amount"])
            .between(date("2009-01-01"), date("2009-02-01"));
        assert_eq!(
            query.to_string(),
            "SELECT fare_amount FROM public.raw_1k \
             WHERE pickup_datetime BETWEEN '2009-01-01' AND '2009-02-01' \
             ORDER BY pickup_datetime"
        );
    }

    #[test]
    fn test_range_query_is_ordered_and_inclusive() {
        let warehouse = Warehouse::temporary().unwrap();
        let table = TableRef::new("public", "raw_1k");
        // inserted out of order on purpose
        let rows = vec![
            ride("2009-01-20 08:00:00 UTC", 3.0),
            ride("2008-12-31 23:59:59 UTC", 0.5),
            ride("2009-01-01 00:00:00 UTC", 1.0),
            ride("2009-02-01 00:00:00 UTC", 4.0),
            ride("2009-01-05 12:00:00 UTC", 2.0),
            ride("2009-02-01 00:00:01 UTC", 9.0),
        ];
        let data = Table::from_rows(Schema::raw(), rows).unwrap();
        write_chunks(&warehouse, &data, &table, 4, WriteMode::Truncate).unwrap();

        let query = Query::select(table, &[] as &[&str])
            .between(date("2009-01-01"), date("2009-02-01"));
        let result = fetch_chunks(&warehouse.cursor(&query), &Schema::raw(), 2).unwrap();
        assert_eq!(
            result.column_f64("fare_amount").unwrap(),
            vec![1.0, 2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn test_projection_and_missing_table() {
        let warehouse = Warehouse::temporary().unwrap();
        let table = TableRef::new("public", "raw_1k");
        let data = Table::from_rows(Schema::raw(), vec![ride("2009-01-01 10:00:00 UTC", 5.0)])
            .unwrap();
        write_chunks(&warehouse, &data, &table, 10, WriteMode::Truncate).unwrap();

        let query = Query::select(table, &["passenger_count", "fare_amount"]);
        let rows = warehouse.read_chunk(&query, 0, 10).unwrap();
        assert_eq!(rows, vec![vec![Value::Int(1), Value::Float(5.0)]]);

        let missing = Query::select(TableRef::new("public", "nope"), &[] as &[&str]);
        assert!(matches!(
            warehouse.read_chunk(&missing, 0, 10),
            Err(DataError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_rewrite_replaces_contents() {
        let warehouse = Warehouse::temporary().unwrap();
        let table = TableRef::new("taxifare", "processed_1k");
        let schema = Schema::processed(1);
        let data = Table::from_rows(
            schema.clone(),
            (0..5)
                .map(|i| vec![Value::Float(i as f64), Value::Float(1.0)])
                .collect(),
        )
        .unwrap();

        write_chunks(&warehouse, &data, &table, 2, WriteMode::Truncate).unwrap();
        write_chunks(&warehouse, &data, &table, 2, WriteMode::Truncate).unwrap();
        assert_eq!(warehouse.row_count(&table).unwrap(), 5);

        write_chunks(&warehouse, &data, &table, 2, WriteMode::Append).unwrap();
        assert_eq!(warehouse.row_count(&table).unwrap(), 10);
    }

    #[test]
    fn test_append_with_other_schema_is_rejected() {
        let warehouse = Warehouse::temporary().unwrap();
        let table = TableRef::new("taxifare", "processed_1k");
        let one = Table::from_rows(
            Schema::processed(1),
            vec![vec![Value::Float(1.0), Value::Float(2.0)]],
        )
        .unwrap();
        let two = Table::from_rows(
            Schema::processed(2),
            vec![vec![Value::Float(1.0), Value::Float(2.0), Value::Float(3.0)]],
        )
        .unwrap();
        write_chunks(&warehouse, &one, &table, 10, WriteMode::Truncate).unwrap();
        assert!(matches!(
            write_chunks(&warehouse, &two, &table, 10, WriteMode::Append),
            Err(DataError::Schema(_))
        ));
    }
}
