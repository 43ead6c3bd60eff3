use std::cell::Cell;

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use taxifare_data::{
    fetch_chunks, write_chunks, CacheKey, IngestionOrchestrator, LocalCacheStore, Query, Row,
    Schema, Table, TableKind, TableRef, Value, Warehouse, WriteMode, RAW_COLUMNS,
};
use tempfile::tempdir;

fn raw_rides(start: &str, count: usize) -> Vec<Row> {
    let start = NaiveDate::parse_from_str(start, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(6, 0, 0)
        .unwrap()
        .and_utc();
    (0..count)
        .map(|i| {
            let pickup = start + Duration::hours(7 * i as i64);
            vec![
                Value::Float(5.0 + (i % 17) as f64 * 0.731),
                Value::Timestamp(pickup),
                Value::Float(-73.99 + (i % 11) as f64 * 0.0013),
                Value::Float(40.73 + (i % 7) as f64 * 0.0021),
                Value::Float(-73.97 - (i % 5) as f64 * 0.0017),
                Value::Float(40.76 - (i % 3) as f64 * 0.0011),
                Value::Int(1 + (i % 4) as i64),
            ]
        })
        .collect()
}

fn seeded_warehouse(rows: Vec<Row>) -> Result<(Warehouse, TableRef)> {
    let warehouse = Warehouse::temporary()?;
    let table = TableRef::new("taxifare_public", "raw_1k");
    write_chunks(
        &warehouse,
        &Table::from_rows(Schema::raw(), rows)?,
        &table,
        50,
        WriteMode::Truncate,
    )?;
    Ok((warehouse, table))
}

fn assert_rows_close(a: &Row, b: &Row) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x.as_f64() - y.as_f64()).abs() < 1e-3, "{x} != {y}");
    }
}

#[test]
fn repeated_request_fetches_remote_once() -> Result<()> {
    let dir = tempdir()?;
    // 2008-12-20 onwards, so the range filter cuts both ends
    let (warehouse, table) = seeded_warehouse(raw_rides("2008-12-20", 200))?;
    let ingest = IngestionOrchestrator::new(LocalCacheStore::new(dir.path()));

    let key = CacheKey::parse(TableKind::Raw, "2009-01-01", "2009-02-01", "1k")?;
    let query = Query::select(table, &RAW_COLUMNS).between(key.min_date(), key.max_date());
    let schema = Schema::raw();

    let fetches = Cell::new(0);
    let fetch = || {
        fetches.set(fetches.get() + 1);
        fetch_chunks(&warehouse.cursor(&query), &schema, 32)
    };

    let first = ingest.get_table(&key, fetch, &schema, true)?;
    let first_bytes = ingest.cache().read_bytes(&key)?;
    let second = ingest.get_table(&key, fetch, &schema, true)?;
    let second_bytes = ingest.cache().read_bytes(&key)?;

    assert_eq!(fetches.get(), 1);
    assert_eq!(first_bytes, second_bytes);
    assert!(!first.is_empty());
    assert_eq!(first.len(), second.len());
    assert_eq!(first.schema().width(), second.schema().width());
    assert_rows_close(first.first().unwrap(), second.first().unwrap());
    assert_rows_close(first.last().unwrap(), second.last().unwrap());

    let lo = key.min_date().and_hms_opt(0, 0, 0).unwrap().and_utc();
    let hi = key.max_date().and_hms_opt(0, 0, 0).unwrap().and_utc();
    for row in second.rows() {
        let pickup = row[1].as_timestamp().unwrap();
        assert!(pickup >= lo && pickup <= hi);
    }
    Ok(())
}

#[test]
fn raw_cache_starts_with_header_and_processed_has_none() -> Result<()> {
    let dir = tempdir()?;
    let ingest = IngestionOrchestrator::new(LocalCacheStore::new(dir.path()));

    let raw_key = CacheKey::parse(TableKind::Raw, "2009-01-01", "2009-02-01", "1k")?;
    ingest.get_table(
        &raw_key,
        || Table::from_rows(Schema::raw(), raw_rides("2009-01-02", 3)),
        &Schema::raw(),
        true,
    )?;
    let raw_text = String::from_utf8(ingest.cache().read_bytes(&raw_key)?)?;
    assert_eq!(raw_text.lines().next(), Some(RAW_COLUMNS.join(",").as_str()));
    assert_eq!(raw_text.lines().count(), 4);

    let processed_key = CacheKey::parse(TableKind::Processed, "2009-01-01", "2009-02-01", "1k")?;
    let processed = Schema::processed(2);
    ingest.get_table(
        &processed_key,
        || {
            Table::from_rows(
                processed.clone(),
                vec![
                    vec![Value::Float(0.25), Value::Float(1.5), Value::Float(7.0)],
                    vec![Value::Float(-0.5), Value::Float(2.0), Value::Float(9.5)],
                ],
            )
        },
        &processed,
        true,
    )?;
    let processed_text = String::from_utf8(ingest.cache().read_bytes(&processed_key)?)?;
    assert_eq!(processed_text, "0.25,1.5,7\n-0.5,2,9.5\n");
    for column in RAW_COLUMNS {
        assert!(!processed_text.contains(column));
    }
    Ok(())
}

#[test]
fn chunked_get_reads_through_warehouse_cursor() -> Result<()> {
    let dir = tempdir()?;
    let (warehouse, table) = seeded_warehouse(raw_rides("2009-01-01", 40))?;
    let ingest = IngestionOrchestrator::new(LocalCacheStore::new(dir.path()));

    let key = CacheKey::parse(TableKind::Raw, "2009-01-01", "2009-02-01", "1k")?;
    let query = Query::select(table, &RAW_COLUMNS).between(key.min_date(), key.max_date());
    let fetched = ingest.get_chunked_table(&key, &Schema::raw(), &warehouse.cursor(&query), 7)?;

    assert_eq!(fetched.len(), 40);
    assert_eq!(
        ingest.cache().load(&key, &Schema::raw())?.as_ref(),
        Some(&fetched)
    );
    Ok(())
}

#[test]
fn writing_twice_leaves_one_copy() -> Result<()> {
    let warehouse = Warehouse::temporary()?;
    let target = TableRef::new("taxifare", "processed_1k");
    let schema = Schema::processed_remote(1);
    let rows: Vec<Row> = raw_rides("2009-01-01", 25)
        .into_iter()
        .map(|ride| vec![ride[1].clone(), ride[2].clone(), ride[0].clone()])
        .collect();
    let data = Table::from_rows(schema.clone(), rows)?;

    write_chunks(&warehouse, &data, &target, 10, WriteMode::Truncate)?;
    write_chunks(&warehouse, &data, &target, 10, WriteMode::Truncate)?;

    let query = Query::select(target.clone(), &[] as &[&str]);
    let read_back = fetch_chunks(&warehouse.cursor(&query), &schema, 100)?;
    assert_eq!(warehouse.row_count(&target)?, 25);
    assert_eq!(read_back, data);
    Ok(())
}

#[test]
fn cache_hit_keeps_sub_second_pickup_times() -> Result<()> {
    let dir = tempdir()?;
    let mut rows = raw_rides("2009-01-02", 6);
    for (i, row) in rows.iter_mut().enumerate() {
        if let Value::Timestamp(ts) = &mut row[1] {
            *ts += Duration::milliseconds(125 * i as i64 + 500);
        }
    }
    let (warehouse, table) = seeded_warehouse(rows)?;
    let ingest = IngestionOrchestrator::new(LocalCacheStore::new(dir.path()));

    let key = CacheKey::parse(TableKind::Raw, "2009-01-01", "2009-02-01", "1k")?;
    let query = Query::select(table, &RAW_COLUMNS).between(key.min_date(), key.max_date());
    let cursor = warehouse.cursor(&query);

    let fetched = ingest.get_chunked_table(&key, &Schema::raw(), &cursor, 4)?;
    let cached = ingest.get_chunked_table(&key, &Schema::raw(), &cursor, 4)?;

    assert_eq!(fetched.len(), 6);
    assert_eq!(fetched, cached);
    Ok(())
}
