//! Deterministic cache keys for date-bounded table requests

use crate::errors::{DataError, Result};
use crate::table::TableKind;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fmt;

/// Date formats accepted by [`normalize_date`], tried in order; slashed
/// dates other than `YYYY/MM/DD` are month first
const DATE_FORMATS: [&str; 12] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y%m%d",
    "%m/%d/%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%B %d %Y",
    "%a, %d %b %Y",
    "%d-%b-%Y",
];

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f UTC",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Normalize date-ish input into a calendar date, so equivalent spellings
/// produce the same cache key
pub fn normalize_date(input: &str) -> Result<NaiveDate> {
    let text = input.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Ok(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(datetime.date());
        }
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Ok(datetime.date_naive());
    }
    Err(DataError::InvalidDate(input.to_string()))
}

/// Identity of a cached table: (kind, min date, max date, size tier)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: TableKind,
    min_date: NaiveDate,
    max_date: NaiveDate,
    data_size: String,
}

impl CacheKey {
    pub fn new(kind: TableKind, min_date: NaiveDate, max_date: NaiveDate, data_size: &str) -> Self {
        Self {
            kind,
            min_date,
            max_date,
            data_size: data_size.to_string(),
        }
    }

    /// Build a key from unnormalized date strings
    pub fn parse(kind: TableKind, min_date: &str, max_date: &str, data_size: &str) -> Result<Self> {
        Ok(Self::new(
            kind,
            normalize_date(min_date)?,
            normalize_date(max_date)?,
            data_size,
        ))
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn min_date(&self) -> NaiveDate {
        self.min_date
    }

    pub fn max_date(&self) -> NaiveDate {
        self.max_date
    }

    pub fn data_size(&self) -> &str {
        &self.data_size
    }

    /// `<min>_<max>_<size>`, shared by file names and remote table suffixes
    pub fn fingerprint(&self) -> String {
        format!(
            "{}_{}_{}",
            self.min_date.format("%Y-%m-%d"),
            self.max_date.format("%Y-%m-%d"),
            self.data_size
        )
    }

    /// Local cache file name
    pub fn file_name(&self) -> String {
        let prefix = match self.kind {
            TableKind::Raw => "query",
            TableKind::Processed => "processed",
        };
        format!("{prefix}_{}.csv", self.fingerprint())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.fingerprint())
    }
}
