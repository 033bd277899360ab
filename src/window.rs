use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::StationError;
use crate::features::{FeatureVector, FEATURE_DIM};
use crate::types::Observation;

pub const DEFAULT_SEQ_LEN: usize = 24;
/// Collection cadence of the upstream snapshots.
pub const DEFAULT_PAD_INTERVAL_MINUTES: i64 = 10;

fn default_interval_minutes() -> i64 {
    DEFAULT_PAD_INTERVAL_MINUTES
}

/// How the synthetic leading copies of a short history are timestamped.
///
/// Ratio and location always come from the earliest real observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PaddingPolicy {
    /// Copies keep the earliest observation's timestamp.
    #[default]
    Repeat,
    /// Copies step backwards from the earliest observation, one interval
    /// apart.
    Backfill {
        #[serde(default = "default_interval_minutes")]
        interval_minutes: i64,
    },
}

impl PaddingPolicy {
    /// `None` when the synthetic timestamp falls outside the calendar.
    fn stamp(&self, earliest: NaiveDateTime, steps_back: usize) -> Option<NaiveDateTime> {
        match *self {
            PaddingPolicy::Repeat => Some(earliest),
            PaddingPolicy::Backfill { interval_minutes } => {
                let minutes = interval_minutes.checked_mul(i64::try_from(steps_back).ok()?)?;
                earliest.checked_sub_signed(Duration::try_minutes(minutes)?)
            }
        }
    }
}

/// Exactly `seq_len` feature vectors for one station, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct InputWindow {
    pub features: Vec<FeatureVector>,
    pub last_observed: NaiveDateTime,
    pub total_capacity: Option<u32>,
}

impl InputWindow {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Row-major `[seq_len * FEATURE_DIM]` buffer.
    pub fn flatten(&self) -> Vec<f32> {
        let mut v = Vec::with_capacity(self.features.len() * FEATURE_DIM);
        for f in &self.features {
            v.extend_from_slice(f.as_slice());
        }
        v
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WindowBuilder {
    seq_len: usize,
    padding: PaddingPolicy,
}

impl WindowBuilder {
    pub fn new(seq_len: usize, padding: PaddingPolicy) -> Self {
        Self { seq_len, padding }
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Build the window from a chronologically sorted history.
    ///
    /// Short histories are front-padded with copies of the earliest
    /// observation; long ones keep only the most recent `seq_len` records.
    pub fn build(&self, history: &[Observation]) -> Result<InputWindow, StationError> {
        let (earliest, last) = match (history.first(), history.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(StationError::InsufficientData),
        };

        let pad = self.seq_len.saturating_sub(history.len());
        let tail = &history[history.len().saturating_sub(self.seq_len)..];

        let mut coerced = 0usize;
        let mut features = Vec::with_capacity(self.seq_len);
        for i in 0..pad {
            let at = self
                .padding
                .stamp(earliest.timestamp, pad - i)
                .ok_or(StationError::PaddingOutOfRange { steps_back: pad - i })?;
            features.push(encode_coerced(earliest, at, &mut coerced));
        }
        for obs in tail {
            features.push(encode_coerced(obs, obs.timestamp, &mut coerced));
        }

        if coerced > 0 {
            tracing::debug!(
                station = last.station_id,
                coerced,
                "coerced missing numeric fields to 0.0"
            );
        }

        Ok(InputWindow {
            features,
            last_observed: last.timestamp,
            total_capacity: last.total_capacity,
        })
    }
}

impl Default for WindowBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SEQ_LEN, PaddingPolicy::default())
    }
}

fn encode_coerced(obs: &Observation, at: NaiveDateTime, coerced: &mut usize) -> FeatureVector {
    let mut fix = |v: f64| {
        if v.is_nan() {
            *coerced += 1;
            0.0
        } else {
            v
        }
    };
    let clean = Observation {
        ratio: fix(obs.ratio),
        longitude: fix(obs.longitude),
        latitude: fix(obs.latitude),
        ..obs.clone()
    };
    FeatureVector::encode(&clean, at)
}
