use std::collections::BTreeMap;

use crate::config::ForecastConfig;
use crate::decoder::HorizonDecoder;
use crate::error::{ModelLoadError, StationError};
use crate::features::FEATURE_NAMES;
use crate::model::SequenceModel;
use crate::types::{Observation, Prediction, PredictionMap, StationHistories};
use crate::window::{InputWindow, WindowBuilder};

/// Result of one pass over every station.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub predictions: PredictionMap,
    /// Station id -> reason, for stations recorded as `[]`.
    pub failed: BTreeMap<i64, String>,
}

/// Window → model → decode for every station, one station's failure never
/// affecting another.
///
/// The model is read-only after load, so a predictor can be shared across
/// threads behind an `Arc`.
pub struct BatchPredictor {
    model: SequenceModel,
    windows: WindowBuilder,
    decoder: HorizonDecoder,
    log_features: bool,
}

impl BatchPredictor {
    pub fn new(model: SequenceModel, windows: WindowBuilder, decoder: HorizonDecoder) -> Self {
        Self {
            model,
            windows,
            decoder,
            log_features: false,
        }
    }

    pub fn load(cfg: &ForecastConfig) -> Result<Self, ModelLoadError> {
        let model = SequenceModel::load(&cfg.model_path, cfg.model)?;
        Ok(Self::new(
            model,
            WindowBuilder::new(cfg.seq_len, cfg.padding),
            HorizonDecoder::new(cfg.prediction_hours),
        )
        .with_feature_logging(cfg.log_features))
    }

    /// Log per-window feature statistics at info level.
    pub fn with_feature_logging(mut self, on: bool) -> Self {
        self.log_features = on;
        self
    }

    pub fn predict_station(&self, history: &[Observation]) -> Result<Vec<Prediction>, StationError> {
        let window = self.windows.build(history)?;
        if self.log_features {
            log_window_stats(history.first().map(|o| o.station_id), &window);
        }
        let ratios = self.model.predict(&window)?;
        Ok(self
            .decoder
            .decode(&ratios, window.last_observed, window.total_capacity))
    }

    pub fn run(&self, histories: &StationHistories) -> BatchReport {
        let report = histories.iter().fold(BatchReport::default(), |mut report, (&id, history)| {
            let preds = match self.predict_station(history) {
                Ok(preds) => preds,
                Err(e) => {
                    tracing::warn!(station = id, error = %e, "prediction failed");
                    report.failed.insert(id, e.to_string());
                    Vec::new()
                }
            };
            report.predictions.insert(id, preds);
            report
        });

        tracing::info!(
            stations = report.predictions.len(),
            failed = report.failed.len(),
            "batch prediction done"
        );
        report
    }

    pub fn predict_all(&self, histories: &StationHistories) -> PredictionMap {
        self.run(histories).predictions
    }
}

/// Load the model and predict every station. A model that cannot be loaded
/// yields an empty map rather than a partial one.
pub fn predict_all_stations(cfg: &ForecastConfig, histories: &StationHistories) -> PredictionMap {
    match BatchPredictor::load(cfg) {
        Ok(predictor) => predictor.predict_all(histories),
        Err(e) => {
            tracing::error!(error = %e, path = %cfg.model_path.display(), "error loading model");
            PredictionMap::new()
        }
    }
}

fn log_window_stats(station: Option<i64>, window: &InputWindow) {
    let vec = window.flatten();
    let nz = vec.iter().filter(|x| **x != 0.0).count();
    let mean = if vec.is_empty() { 0.0 } else { vec.iter().sum::<f32>() / (vec.len() as f32) };
    let std = if vec.len() < 2 {
        0.0
    } else {
        (vec.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / (vec.len() as f32)).sqrt()
    };
    let sample: Vec<String> = match window.features.last() {
        Some(last) => FEATURE_NAMES
            .iter()
            .zip(last.as_slice())
            .map(|(name, v)| format!("{}={:.3}", name, v))
            .collect(),
        None => Vec::new(),
    };
    tracing::info!(
        "window station={:?} steps={} nonzero={} mean={:.3} std={:.3} last=[{}]",
        station,
        window.len(),
        nz,
        mean,
        std,
        sample.join(", ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelConfig;
    use crate::window::PaddingPolicy;
    use chrono::{NaiveDate, NaiveDateTime};
    use tch::{Device, Kind, Tensor};

    fn small() -> ModelConfig {
        ModelConfig { feature_dim: 4, hidden_dim: 4, output_len: 144 }
    }

    fn predictor(hours: usize) -> BatchPredictor {
        predictor_with(hours, PaddingPolicy::Repeat)
    }

    fn predictor_with(hours: usize, padding: PaddingPolicy) -> BatchPredictor {
        let cfg = small();
        let named = cfg
            .parameter_shapes()
            .into_iter()
            .map(|(n, s)| (n.to_string(), Tensor::zeros(s.as_slice(), (Kind::Float, Device::Cpu))));
        let model = SequenceModel::from_named_tensors(named, cfg).unwrap();
        BatchPredictor::new(model, WindowBuilder::new(24, padding), HorizonDecoder::new(hours))
    }

    fn ts(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn obs(id: i64, h: u32, total: Option<u32>) -> Observation {
        Observation {
            station_id: id,
            timestamp: ts(h),
            ratio: 0.5,
            longitude: -0.37,
            latitude: 39.46,
            total_capacity: total,
        }
    }

    #[test]
    fn empty_station_maps_to_empty_list() {
        let mut histories = StationHistories::new();
        histories.insert(7, vec![]);
        histories.insert(42, vec![obs(42, 0, Some(20))]);

        let report = predictor(24).run(&histories);
        assert!(report.predictions[&7].is_empty());
        assert_eq!(report.predictions[&42].len(), 24);
        assert!(report.failed.contains_key(&7));
        assert!(!report.failed.contains_key(&42));
    }

    #[test]
    fn non_finite_station_is_isolated() {
        let mut histories = StationHistories::new();
        histories.insert(3, vec![Observation { ratio: f64::INFINITY, ..obs(3, 0, Some(10)) }]);
        histories.insert(42, vec![obs(42, 0, Some(20))]);

        let report = predictor(24).run(&histories);
        assert!(report.predictions[&3].is_empty());
        assert!(report.failed[&3].contains("non-finite"));
        assert_eq!(report.predictions[&42].len(), 24);
        assert!(!report.failed.contains_key(&42));
    }

    #[test]
    fn padding_overflow_is_isolated() {
        let padding = PaddingPolicy::Backfill { interval_minutes: 10_000_000_000 };
        let mut histories = StationHistories::new();
        histories.insert(3, vec![obs(3, 0, Some(10))]);
        histories.insert(42, (0..24).map(|h| obs(42, h, Some(20))).collect());

        let report = predictor_with(24, padding).run(&histories);
        assert!(report.predictions[&3].is_empty());
        assert!(report.failed[&3].contains("out of range"));
        assert_eq!(report.predictions[&42].len(), 24);
    }

    #[test]
    fn zero_weights_give_half_capacity() {
        let mut histories = StationHistories::new();
        histories.insert(42, vec![obs(42, 0, Some(20))]);

        let map = predictor(3).predict_all(&histories);
        let preds = &map[&42];
        assert_eq!(preds.len(), 3);
        for (p, h) in preds.iter().zip(1..) {
            assert_eq!(p.hour, h);
            assert_eq!(p.timestamp, ts(h));
            assert_eq!(p.bikes, Some(10));
        }
    }

    #[test]
    fn unknown_capacity_leaves_bikes_absent() {
        let mut histories = StationHistories::new();
        histories.insert(5, vec![obs(5, 0, None), obs(5, 1, Some(0))]);
        let map = predictor(24).predict_all(&histories);
        assert!(map[&5].iter().all(|p| p.bikes.is_none()));
    }

    #[test]
    fn missing_weights_give_empty_map() {
        let cfg = ForecastConfig {
            model_path: "/definitely/not/here.safetensors".into(),
            ..ForecastConfig::default()
        };
        let mut histories = StationHistories::new();
        histories.insert(42, vec![obs(42, 0, Some(20))]);
        assert!(predict_all_stations(&cfg, &histories).is_empty());
    }
}
