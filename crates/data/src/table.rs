//! Typed, ordered tables shared by the warehouse, the cache and the trainer
//!
//! A [`Table`] is a schema plus rows in source order. Every row is checked
//! against the schema when it enters a table, so width and column types are
//! fixed for the table's lifetime.

use crate::errors::{DataError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column order of the raw ride table, as queried from the warehouse
pub const RAW_COLUMNS: [&str; 7] = [
    "fare_amount",
    "pickup_datetime",
    "pickup_longitude",
    "pickup_latitude",
    "dropoff_longitude",
    "dropoff_latitude",
    "passenger_count",
];

/// Name of the ordering column in both raw and remote processed tables
pub const TIMESTAMP_COLUMN: &str = "pickup_datetime";

/// Textual timestamp form used in CSV files; fractional seconds are written
/// only when present
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f UTC";

/// Kind of table, which drives naming and the cache header policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    /// Rides as they come out of the warehouse
    Raw,
    /// Numeric features followed by the target
    Processed,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Raw => "raw",
            TableKind::Processed => "processed",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Timestamp,
    Float,
    Int,
}

impl ColumnType {
    /// Decode one CSV field into a value of this type
    pub fn parse(&self, text: &str) -> std::result::Result<Value, String> {
        let text = text.trim();
        match self {
            ColumnType::Timestamp => parse_timestamp(text).map(Value::Timestamp),
            ColumnType::Float => text
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| format!("invalid float {text:?}: {e}")),
            ColumnType::Int => text
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| format!("invalid integer {text:?}: {e}")),
        }
    }
}

/// Parse a warehouse timestamp (`2013-07-06 17:18:00 UTC`) or RFC 3339 text
pub fn parse_timestamp(text: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT) {
        return Ok(naive.and_utc());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| format!("invalid timestamp {text:?}"))
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A single cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Timestamp(DateTime<Utc>),
    Float(f64),
    Int(i64),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Timestamp(_) => ColumnType::Timestamp,
            Value::Float(_) => ColumnType::Float,
            Value::Int(_) => ColumnType::Int,
        }
    }

    /// Numeric view of the value; timestamps become seconds since the epoch
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Timestamp(ts) => ts.timestamp() as f64,
            Value::Float(v) => *v,
            Value::Int(v) => *v as f64,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
            // `Display` for f64 is the shortest representation that round-trips
            Value::Float(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
        }
    }
}

/// One row of a table
pub type Row = Vec<Value>;

/// Ordered column layout of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    kind: TableKind,
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(kind: TableKind, columns: Vec<Column>) -> Self {
        Self { kind, columns }
    }

    /// Schema of raw rides
    pub fn raw() -> Self {
        let columns = RAW_COLUMNS
            .iter()
            .map(|&name| {
                let ty = match name {
                    TIMESTAMP_COLUMN => ColumnType::Timestamp,
                    "passenger_count" => ColumnType::Int,
                    _ => ColumnType::Float,
                };
                Column::new(name, ty)
            })
            .collect();
        Self::new(TableKind::Raw, columns)
    }

    /// Schema of processed rows: `feature_count` features then the target,
    /// named by position (`"0"`, `"1"`, ...)
    pub fn processed(feature_count: usize) -> Self {
        let columns = (0..=feature_count)
            .map(|i| Column::new(i.to_string(), ColumnType::Float))
            .collect();
        Self::new(TableKind::Processed, columns)
    }

    /// Processed schema prefixed with the pickup timestamp, as stored remotely
    pub fn processed_remote(feature_count: usize) -> Self {
        let mut columns = vec![Column::new(TIMESTAMP_COLUMN, ColumnType::Timestamp)];
        columns.extend(Self::processed(feature_count).columns);
        Self::new(TableKind::Processed, columns)
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Raw tables are cached with a header row, processed tables without
    pub fn has_header(&self) -> bool {
        self.kind == TableKind::Raw
    }

    /// Check width and per-column types of a row
    pub fn check_row(&self, row: &[Value]) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(DataError::Schema(format!(
                "expected {} columns, got {}",
                self.columns.len(),
                row.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(row) {
            if column.ty != value.column_type() {
                return Err(DataError::Schema(format!(
                    "column {} expects {:?}, got {:?}",
                    column.name,
                    column.ty,
                    value.column_type()
                )));
            }
        }
        Ok(())
    }

    /// Decode a sequence of text fields into a row of this schema
    pub fn decode<'a, I>(&self, fields: I) -> std::result::Result<Row, String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut row = Vec::with_capacity(self.columns.len());
        let mut fields = fields.into_iter();
        for column in &self.columns {
            let field = fields
                .next()
                .ok_or_else(|| format!("missing column {}", column.name))?;
            row.push(column.ty.parse(field)?);
        }
        if fields.next().is_some() {
            return Err(format!("more than {} columns", self.columns.len()));
        }
        Ok(row)
    }
}

/// Schema plus rows in source order
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    schema: Schema,
    rows: Vec<Row>,
}

impl Table {
    pub fn empty(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(schema: Schema, rows: Vec<Row>) -> Result<Self> {
        let mut table = Self::empty(schema);
        table.append(rows)?;
        Ok(table)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn last(&self) -> Option<&Row> {
        self.rows.last()
    }

    pub fn push(&mut self, row: Row) -> Result<()> {
        self.schema.check_row(&row)?;
        self.rows.push(row);
        Ok(())
    }

    /// Append rows after the existing ones, validating each
    pub fn append(&mut self, rows: Vec<Row>) -> Result<()> {
        for row in &rows {
            self.schema.check_row(row)?;
        }
        self.rows.extend(rows);
        Ok(())
    }

    /// Values of one column as `f64`
    pub fn column_f64(&self, name: &str) -> Result<Vec<f64>> {
        let idx = self
            .schema
            .index_of(name)
            .ok_or_else(|| DataError::Schema(format!("unknown column {name}")))?;
        Ok(self.rows.iter().map(|row| row[idx].as_f64()).collect())
    }

    /// Split into `[0, at)` and `[at, len)`, keeping order
    pub fn split_at(mut self, at: usize) -> (Table, Table) {
        let at = at.min(self.rows.len());
        let tail = self.rows.split_off(at);
        let schema = self.schema.clone();
        (self, Table { schema, rows: tail })
    }

    /// Feature matrix and target vector: the last column is the target
    pub fn features_and_targets(&self) -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut features = Vec::with_capacity(self.rows.len());
        let mut targets = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            if let Some((target, rest)) = row.split_last() {
                features.push(rest.iter().map(Value::as_f64).collect());
                targets.push(target.as_f64());
            }
        }
        (features, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_raw_schema_layout() {
        let schema = Schema::raw();
        assert_eq!(schema.column_names(), RAW_COLUMNS.to_vec());
        assert_eq!(schema.index_of(TIMESTAMP_COLUMN), Some(1));
        assert!(schema.has_header());
    }

    #[test]
    fn test_processed_schema_is_positional_and_headerless() {
        let schema = Schema::processed(3);
        assert_eq!(schema.column_names(), vec!["0", "1", "2", "3"]);
        assert!(!schema.has_header());

        let remote = Schema::processed_remote(3);
        assert_eq!(remote.width(), 5);
        assert_eq!(remote.columns()[0].ty, ColumnType::Timestamp);
    }

    #[test]
    fn test_rejects_wrong_width_and_type() {
        let schema = Schema::raw();
        let mut row = ride("2009-01-01 00:00:00 UTC", 5.0);
        row.pop();
        assert!(matches!(schema.check_row(&row), Err(DataError::Schema(_))));

        let mut row = ride("2009-01-01 00:00:00 UTC", 5.0);
        row[6] = Value::Float(1.0);
        assert!(matches!(schema.check_row(&row), Err(DataError::Schema(_))));
    }

    #[test]
    fn test_value_text_round_trip() {
        let schema = Schema::raw();
        let row = ride("2013-07-06 17:18:00 UTC", 12.3456789);
        let text: Vec<String> = row.iter().map(Value::to_string).collect();
        assert_eq!(text[1], "2013-07-06 17:18:00 UTC");

        let decoded = schema.decode(text.iter().map(String::as_str)).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn test_parse_timestamp_accepts_rfc3339() {
        let a = parse_timestamp("2013-07-06 17:18:00 UTC").unwrap();
        let b = parse_timestamp("2013-07-06T17:18:00+00:00").unwrap();
        assert_eq!(a, b);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_split_at_keeps_order() {
        let rows = vec![
            ride("2009-01-01 00:00:00 UTC", 1.0),
            ride("2009-01-02 00:00:00 UTC", 2.0),
            ride("2009-01-03 00:00:00 UTC", 3.0),
        ];
        let table = Table::from_rows(Schema::raw(), rows).unwrap();
        let (head, tail) = table.split_at(2);
        assert_eq!(head.column_f64("fare_amount").unwrap(), vec![1.0, 2.0]);
        assert_eq!(tail.column_f64("fare_amount").unwrap(), vec![3.0]);
    }

    #[test]
    fn test_features_and_targets() {
        let rows = vec![
            vec![Value::Float(1.0), Value::Float(2.0), Value::Float(10.0)],
            vec![Value::Float(3.0), Value::Float(4.0), Value::Float(20.0)],
        ];
        let table = Table::from_rows(Schema::processed(2), rows).unwrap();
        let (x, y) = table.features_and_targets();
        assert_eq!(x, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(y, vec![10.0, 20.0]);
    }
}
