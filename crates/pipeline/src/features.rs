//! Ride cleaning and feature engineering
//!
//! Raw rows follow [`Schema::raw`]; processed rows are
//! `[pickup_datetime, features.., fare_amount]` as in
//! [`Schema::processed_remote`] with [`FEATURE_COUNT`] features.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use std::collections::HashSet;
use std::f64::consts::PI;
use taxifare_data::{Row, Schema, Table, Value};
use tracing::info;

/// Names of the engineered features, in column order
pub const FEATURE_NAMES: [&str; 9] = [
    "hour_sin",
    "hour_cos",
    "day_of_week",
    "month",
    "years_since_2009",
    "passenger_count",
    "haversine_km",
    "manhattan_km",
    "dropoff_to_center_km",
];

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

/// NYC bounding box applied to pickup and dropoff coordinates
pub const NYC_LONGITUDE: (f64, f64) = (-74.3, -73.7);
pub const NYC_LATITUDE: (f64, f64) = (40.5, 40.9);

const EARTH_RADIUS_KM: f64 = 6371.0;
const MANHATTAN_CENTER: (f64, f64) = (-73.9857, 40.7484);

/// One ride as seen at prediction time (no fare)
#[derive(Debug, Clone, PartialEq)]
pub struct Ride {
    pub pickup_datetime: DateTime<Utc>,
    pub pickup_longitude: f64,
    pub pickup_latitude: f64,
    pub dropoff_longitude: f64,
    pub dropoff_latitude: f64,
    pub passenger_count: i64,
}

impl Ride {
    /// Ride used by `predict` when no input is given
    pub fn sample() -> Self {
        Self {
            pickup_datetime: Utc
                .with_ymd_and_hms(2013, 7, 6, 17, 18, 0)
                .single()
                .unwrap_or_default(),
            pickup_longitude: -73.950655,
            pickup_latitude: 40.783282,
            dropoff_longitude: -73.984365,
            dropoff_latitude: 40.769802,
            passenger_count: 1,
        }
    }

    /// Decode a raw row into its ride and fare
    pub fn from_raw_row(row: &Row) -> Result<(Self, f64)> {
        match row.as_slice() {
            [Value::Float(fare), Value::Timestamp(pickup), Value::Float(plon), Value::Float(plat), Value::Float(dlon), Value::Float(dlat), Value::Int(passengers)] => {
                Ok((
                    Self {
                        pickup_datetime: *pickup,
                        pickup_longitude: *plon,
                        pickup_latitude: *plat,
                        dropoff_longitude: *dlon,
                        dropoff_latitude: *dlat,
                        passenger_count: *passengers,
                    },
                    *fare,
                ))
            }
            _ => Err(anyhow!("row does not match the raw ride layout")),
        }
    }

    fn in_nyc(&self) -> bool {
        let lon = |x: f64| (NYC_LONGITUDE.0..=NYC_LONGITUDE.1).contains(&x);
        let lat = |y: f64| (NYC_LATITUDE.0..=NYC_LATITUDE.1).contains(&y);
        lon(self.pickup_longitude)
            && lon(self.dropoff_longitude)
            && lat(self.pickup_latitude)
            && lat(self.dropoff_latitude)
    }

    /// Feature vector in [`FEATURE_NAMES`] order
    pub fn features(&self) -> Vec<f64> {
        let hour = self.pickup_datetime.hour() as f64 + self.pickup_datetime.minute() as f64 / 60.0;
        let angle = 2.0 * PI * hour / 24.0;
        let pickup = (self.pickup_longitude, self.pickup_latitude);
        let dropoff = (self.dropoff_longitude, self.dropoff_latitude);

        vec![
            angle.sin(),
            angle.cos(),
            self.pickup_datetime.weekday().num_days_from_monday() as f64,
            self.pickup_datetime.month() as f64,
            (self.pickup_datetime.year() - 2009) as f64,
            self.passenger_count as f64,
            haversine_km(pickup, dropoff),
            manhattan_km(pickup, dropoff),
            haversine_km(dropoff, MANHATTAN_CENTER),
        ]
    }
}

/// Drop duplicate rows, non-positive fares, passenger counts outside
/// `1..=8` and rides leaving the NYC bounding box
pub fn clean(raw: Table) -> Result<Table> {
    let before = raw.len();
    let schema = raw.schema().clone();
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(before);

    for row in raw.into_rows() {
        let (ride, fare) = Ride::from_raw_row(&row)?;
        if fare <= 0.0 || !(1..=8).contains(&ride.passenger_count) || !ride.in_nyc() {
            continue;
        }
        let fingerprint: Vec<String> = row.iter().map(ToString::to_string).collect();
        if seen.insert(fingerprint) {
            kept.push(row);
        }
    }

    info!(before, after = kept.len(), "cleaned raw rides");
    Ok(Table::from_rows(schema, kept)?)
}

/// Turn cleaned raw rides into processed rows for the warehouse
pub fn preprocess(cleaned: &Table) -> Result<Table> {
    let mut rows = Vec::with_capacity(cleaned.len());
    for row in cleaned.rows() {
        let (ride, fare) = Ride::from_raw_row(row)?;
        let mut processed = Vec::with_capacity(FEATURE_COUNT + 2);
        processed.push(Value::Timestamp(ride.pickup_datetime));
        processed.extend(ride.features().into_iter().map(Value::Float));
        processed.push(Value::Float(fare));
        rows.push(processed);
    }
    Ok(Table::from_rows(Schema::processed_remote(FEATURE_COUNT), rows)?)
}

/// Feature matrix for rides without a known fare
pub fn feature_matrix(rides: &[Ride]) -> Vec<Vec<f64>> {
    rides.iter().map(Ride::features).collect()
}

fn haversine_km((lon1, lat1): (f64, f64), (lon2, lat2): (f64, f64)) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

fn manhattan_km(pickup: (f64, f64), dropoff: (f64, f64)) -> f64 {
    haversine_km(pickup, (dropoff.0, pickup.1)) + haversine_km((dropoff.0, pickup.1), dropoff)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_row(fare: f64, passengers: i64, pickup_lon: f64) -> Row {
        let ride = Ride::sample();
        vec![
            Value::Float(fare),
            Value::Timestamp(ride.pickup_datetime),
            Value::Float(pickup_lon),
            Value::Float(ride.pickup_latitude),
            Value::Float(ride.dropoff_longitude),
            Value::Float(ride.dropoff_latitude),
            Value::Int(passengers),
        ]
    }

    #[test]
    fn test_clean_filters_invalid_rides() {
        let raw = Table::from_rows(
            Schema::raw(),
            vec![
                raw_row(12.5, 1, -73.95),
                raw_row(12.5, 1, -73.95), // duplicate
                raw_row(0.0, 1, -73.95),
                raw_row(-3.0, 2, -73.95),
                raw_row(8.0, 0, -73.95),
                raw_row(8.0, 9, -73.95),
                raw_row(8.0, 8, -73.95),
                raw_row(8.0, 2, -75.0),
            ],
        )
        .unwrap();

        let cleaned = clean(raw).unwrap();
        assert_eq!(cleaned.column_f64("passenger_count").unwrap(), vec![1.0, 8.0]);
    }

    #[test]
    fn test_sample_ride_features() {
        let features = Ride::sample().features();
        assert_eq!(features.len(), FEATURE_COUNT);
        // Saturday in July 2013
        assert_eq!(features[2], 5.0);
        assert_eq!(features[3], 7.0);
        assert_eq!(features[4], 4.0);
        // about 3.3 km as the crow flies
        assert!((features[6] - 3.3).abs() < 0.2, "{}", features[6]);
        assert!(features[7] >= features[6]);
    }

    #[test]
    fn test_preprocess_layout() {
        let cleaned = Table::from_rows(Schema::raw(), vec![raw_row(12.5, 1, -73.95)]).unwrap();
        let processed = preprocess(&cleaned).unwrap();
        assert_eq!(processed.schema(), &Schema::processed_remote(FEATURE_COUNT));
        let row = processed.first().unwrap();
        assert_eq!(row.len(), FEATURE_COUNT + 2);
        assert_eq!(row[0].as_timestamp(), Some(Ride::sample().pickup_datetime));
        assert_eq!(row[FEATURE_COUNT + 1], Value::Float(12.5));
    }
}
