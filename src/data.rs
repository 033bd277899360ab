//! Reader for the aggregated station table.
//!
//! One row per (station, snapshot). Only the columns the forecaster needs
//! are read; the rest are ignored.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime};

use crate::types::{Observation, StationHistories, StationSnapshot};

pub const COL_NUMBER: &str = "number";
pub const COL_UPDATED_AT: &str = "updated_at";
pub const COL_RATIO: &str = "available_to_total_ratio";
pub const COL_LON: &str = "geo_point_2d.lon";
pub const COL_LAT: &str = "geo_point_2d.lat";
pub const COL_TOTAL: &str = "total";

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

pub fn load_histories<P: AsRef<Path>>(path: P) -> Result<StationHistories> {
    let file = File::open(&path)
        .with_context(|| format!("failed to open station table {:?}", path.as_ref()))?;
    read_histories(file)
}

/// Group rows by station and sort each history by timestamp.
///
/// Unparseable numeric cells become NaN. A row with a bad timestamp still
/// registers its station but contributes no observation.
pub fn read_histories<R: Read>(rdr: R) -> Result<StationHistories> {
    let mut reader = csv::Reader::from_reader(rdr);
    let headers = reader.headers().context("failed to read CSV header")?.clone();
    let col = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("column '{}' not found", name))
    };
    let (i_number, i_time) = (col(COL_NUMBER)?, col(COL_UPDATED_AT)?);
    let (i_ratio, i_lon, i_lat, i_total) = (col(COL_RATIO)?, col(COL_LON)?, col(COL_LAT)?, col(COL_TOTAL)?);

    let mut histories = StationHistories::new();
    let (mut rows, mut skipped) = (0usize, 0usize);
    for (line, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("failed to parse CSV record {}", line + 1))?;
        rows += 1;
        let field = |i: usize| record.get(i).unwrap_or("").trim();

        let Some(station_id) = parse_station_id(field(i_number)) else {
            skipped += 1;
            tracing::debug!(row = line + 1, value = field(i_number), "skipping row without station id");
            continue;
        };
        let history = histories.entry(station_id).or_default();

        let Some(timestamp) = parse_timestamp(field(i_time)) else {
            skipped += 1;
            tracing::debug!(station = station_id, value = field(i_time), "skipping row with bad timestamp");
            continue;
        };

        history.push(Observation {
            station_id,
            timestamp,
            ratio: parse_f64(field(i_ratio)),
            longitude: parse_f64(field(i_lon)),
            latitude: parse_f64(field(i_lat)),
            total_capacity: parse_capacity(field(i_total)),
        });
    }

    for history in histories.values_mut() {
        history.sort_by_key(|o| o.timestamp);
    }
    tracing::info!(rows, skipped, stations = histories.len(), "loaded station table");
    Ok(histories)
}

pub fn snapshots(histories: &StationHistories) -> Vec<StationSnapshot> {
    histories
        .iter()
        .map(|(&id, history)| StationSnapshot::latest(id, history))
        .collect()
}

pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

fn parse_station_id(s: &str) -> Option<i64> {
    s.parse::<i64>().ok().or_else(|| {
        let f = s.parse::<f64>().ok()?;
        (f.is_finite() && f.fract() == 0.0).then_some(f as i64)
    })
}

fn parse_f64(s: &str) -> f64 {
    s.parse().unwrap_or(f64::NAN)
}

fn parse_capacity(s: &str) -> Option<u32> {
    let f: f64 = s.parse().ok()?;
    (f.is_finite() && f >= 0.0).then(|| f.round() as u32)
}
