use chrono::{Duration, NaiveDateTime};

use crate::types::Prediction;

/// Model steps per hour (10-minute resolution).
pub const STEPS_PER_HOUR: usize = 6;
pub const MAX_HORIZON_HOURS: usize = 24;

/// Turns the model's 10-minute output into one prediction per whole hour.
#[derive(Debug, Clone, Copy)]
pub struct HorizonDecoder {
    hours: usize,
}

impl HorizonDecoder {
    /// `hours` above 24 is clamped.
    pub fn new(hours: usize) -> Self {
        Self { hours: hours.min(MAX_HORIZON_HOURS) }
    }

    pub fn hours(&self) -> usize {
        self.hours
    }

    /// Hour `h` reads index `h * 6 - 1`, the step that ends exactly at the
    /// top of that hour. Stops early if the output is too short.
    pub fn decode(
        &self,
        ratios: &[f32],
        last_observed: NaiveDateTime,
        total_capacity: Option<u32>,
    ) -> Vec<Prediction> {
        let mut out = Vec::with_capacity(self.hours);
        for hour in 1..=self.hours {
            let idx = hour * STEPS_PER_HOUR - 1;
            let Some(&ratio) = ratios.get(idx) else {
                break;
            };

            out.push(Prediction {
                hour: hour as u32,
                timestamp: last_observed + Duration::hours(hour as i64),
                ratio,
                bikes: bikes_for(ratio, total_capacity),
            });
        }
        out
    }
}

impl Default for HorizonDecoder {
    fn default() -> Self {
        Self::new(MAX_HORIZON_HOURS)
    }
}

fn bikes_for(ratio: f32, total_capacity: Option<u32>) -> Option<u32> {
    match total_capacity {
        Some(total) if total > 0 => Some((ratio as f64 * total as f64).round().max(0.0) as u32),
        _ => None,
    }
}
