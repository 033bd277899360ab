use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One availability snapshot for a station.
///
/// Numeric cells the table could not provide are carried as NaN and are
/// coerced when a window is built.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub station_id: i64,
    pub timestamp: NaiveDateTime,
    pub ratio: f64,
    pub longitude: f64,
    pub latitude: f64,
    pub total_capacity: Option<u32>, // None when unknown
}

/// Forecast for one whole hour after the last observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub hour: u32,
    pub timestamp: NaiveDateTime,
    pub ratio: f32,
    pub bikes: Option<u32>,
}

/// Station id -> predictions in ascending hour order. Stations that failed
/// map to an empty list.
pub type PredictionMap = BTreeMap<i64, Vec<Prediction>>;

/// Station histories keyed by id, each sorted by timestamp.
pub type StationHistories = BTreeMap<i64, Vec<Observation>>;

// ---------- Wire types ----------

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PredictionOut {
    pub hour: u32,
    pub time: String,
    pub time_label: String,
    pub predicted_ratio: f32,
    pub predicted_bikes: Option<u32>,
}

impl From<&Prediction> for PredictionOut {
    fn from(p: &Prediction) -> Self {
        Self {
            hour: p.hour,
            time: p.timestamp.format("%Y-%m-%d %H:%M").to_string(),
            time_label: p.timestamp.format("%H:%M").to_string(),
            predicted_ratio: p.ratio,
            predicted_bikes: p.bikes,
        }
    }
}

pub fn to_wire(map: &PredictionMap) -> BTreeMap<i64, Vec<PredictionOut>> {
    map.iter()
        .map(|(id, preds)| (*id, preds.iter().map(PredictionOut::from).collect()))
        .collect()
}

/// Latest known state of a station, shown next to its forecast.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StationSnapshot {
    pub number: i64,
    pub total: Option<u32>,
    pub current_ratio: f64,
}

impl StationSnapshot {
    /// Built from the most recent observation. The ratio is clamped to
    /// [0, 1] and a malformed ratio reads as 0.0.
    pub fn latest(station_id: i64, history: &[Observation]) -> Self {
        let last = history.last();
        let ratio = last.map(|o| o.ratio).unwrap_or(0.0);
        let current_ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        Self {
            number: station_id,
            total: last.and_then(|o| o.total_capacity),
            current_ratio,
        }
    }
}
