//! Per-observation feature encoding.
//!
//! Layout: `[ratio, lon, lat, hour_sin, hour_cos, weekday, is_weekend]`.
//! Hour is encoded on the unit circle so 23:00 and 00:00 stay adjacent.

use std::f64::consts::PI;

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::types::Observation;

pub const FEATURE_DIM: usize = 7;

pub const FEATURE_NAMES: [&str; FEATURE_DIM] = [
    "ratio",
    "geo_point_2d.lon",
    "geo_point_2d.lat",
    "hour_sin",
    "hour_cos",
    "weekday_num",
    "is_weekend",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector(pub [f32; FEATURE_DIM]);

impl FeatureVector {
    /// Encode `obs` with the time features taken from `at`.
    pub fn encode(obs: &Observation, at: NaiveDateTime) -> Self {
        let hour = at.hour() as f64;
        let angle = 2.0 * PI * hour / 24.0;
        let weekday = at.weekday().num_days_from_monday();
        let is_weekend = if weekday >= 5 { 1.0 } else { 0.0 };

        Self([
            obs.ratio as f32,
            obs.longitude as f32,
            obs.latitude as f32,
            angle.sin() as f32,
            angle.cos() as f32,
            weekday as f32,
            is_weekend,
        ])
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn obs_at(ts: NaiveDateTime) -> Observation {
        Observation {
            station_id: 1,
            timestamp: ts,
            ratio: 0.5,
            longitude: -0.37,
            latitude: 39.46,
            total_capacity: Some(20),
        }
    }

    fn ts(y: i32, mo: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn encodes_midnight_wednesday() {
        // 2025-01-01 is a Wednesday
        let t = ts(2025, 1, 1, 0);
        let f = FeatureVector::encode(&obs_at(t), t);
        assert_eq!(f.0[0], 0.5);
        assert_eq!(f.0[1], -0.37_f32);
        assert_eq!(f.0[2], 39.46_f32);
        assert!(f.0[3].abs() < 1e-6);
        assert!((f.0[4] - 1.0).abs() < 1e-6);
        assert_eq!(f.0[5], 2.0);
        assert_eq!(f.0[6], 0.0);
    }

    #[test]
    fn weekend_flag_follows_monday_zero() {
        let sat = ts(2025, 1, 4, 6);
        let sun = ts(2025, 1, 5, 6);
        let mon = ts(2025, 1, 6, 6);
        let o = obs_at(sat);

        assert_eq!(FeatureVector::encode(&o, sat).0[5..], [5.0, 1.0]);
        assert_eq!(FeatureVector::encode(&o, sun).0[5..], [6.0, 1.0]);
        assert_eq!(FeatureVector::encode(&o, mon).0[5..], [0.0, 0.0]);
    }

    #[test]
    fn six_am_is_quarter_turn() {
        let t = ts(2025, 1, 1, 6);
        let f = FeatureVector::encode(&obs_at(t), t);
        assert!((f.0[3] - 1.0).abs() < 1e-6);
        assert!(f.0[4].abs() < 1e-6);
    }

    #[test]
    fn nan_propagates() {
        let t = ts(2025, 1, 1, 0);
        let mut o = obs_at(t);
        o.ratio = f64::NAN;
        assert!(FeatureVector::encode(&o, t).0[0].is_nan());
    }

    #[test]
    fn minutes_do_not_change_hour_encoding() {
        let o = obs_at(ts(2025, 1, 1, 0));
        let a = ts(2025, 1, 1, 14);
        let b = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(14, 50, 0).unwrap();
        assert_eq!(FeatureVector::encode(&o, a), FeatureVector::encode(&o, b));
    }
}
