use std::{fs, path::{Path, PathBuf}};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::decoder::MAX_HORIZON_HOURS;
use crate::model::ModelConfig;
use crate::window::{PaddingPolicy, DEFAULT_SEQ_LEN};

/// One day between padded copies is already far beyond any real cadence.
pub const MAX_PAD_INTERVAL_MINUTES: i64 = 24 * 60;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ForecastConfig {
    pub model_path: PathBuf,
    pub data_path: PathBuf,
    pub prediction_hours: usize,
    pub seq_len: usize,
    pub padding: PaddingPolicy,
    pub model: ModelConfig,
    pub port: u16,
    /// When set, write the prediction map here and exit instead of serving.
    pub predictions_out: Option<PathBuf>,
    pub log_features: bool,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("gru_bike_prediction_model.safetensors"),
            data_path: PathBuf::from("agg.csv"),
            prediction_hours: MAX_HORIZON_HOURS,
            seq_len: DEFAULT_SEQ_LEN,
            padding: PaddingPolicy::default(),
            model: ModelConfig::default(),
            port: 8080,
            predictions_out: None,
            log_features: false,
        }
    }
}

impl ForecastConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("invalid config JSON in {}", path.display()))
    }

    /// `CONFIG_PATH` (optional JSON file), then individual env overrides.
    pub fn from_env() -> Result<Self> {
        let mut cfg = match std::env::var("CONFIG_PATH") {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = get("MODEL_PATH") {
            self.model_path = v.into();
        }
        if let Some(v) = get("DATA_PATH") {
            self.data_path = v.into();
        }
        if let Some(v) = get("PREDICTIONS_OUT") {
            self.predictions_out = Some(v.into());
        }
        if let Some(v) = get("PORT") {
            self.port = v.parse().with_context(|| format!("PORT must be a port number, got {v:?}"))?;
        }
        if let Some(v) = get("PREDICTION_HOURS") {
            self.prediction_hours = v
                .parse()
                .with_context(|| format!("PREDICTION_HOURS must be an integer, got {v:?}"))?;
        }
        if let Some(v) = get("SEQ_LEN") {
            self.seq_len = v.parse().with_context(|| format!("SEQ_LEN must be an integer, got {v:?}"))?;
        }
        if get("LOG_PRED").as_deref() == Some("1") {
            self.log_features = true;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.seq_len == 0 {
            bail!("seq_len must be at least 1");
        }
        if let PaddingPolicy::Backfill { interval_minutes } = self.padding {
            if !(1..=MAX_PAD_INTERVAL_MINUTES).contains(&interval_minutes) {
                bail!(
                    "padding interval must be between 1 and {} minutes, got {}",
                    MAX_PAD_INTERVAL_MINUTES,
                    interval_minutes
                );
            }
        }
        if self.prediction_hours > MAX_HORIZON_HOURS {
            tracing::warn!(
                "prediction_hours ({}) exceeds {}; predictions stop at {}",
                self.prediction_hours,
                MAX_HORIZON_HOURS,
                MAX_HORIZON_HOURS
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_deployment() {
        let cfg = ForecastConfig::default();
        assert_eq!(cfg.prediction_hours, 24);
        assert_eq!(cfg.seq_len, 24);
        assert_eq!(cfg.padding, PaddingPolicy::Repeat);
        assert_eq!(cfg.model.output_len, 144);
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forecast.json");
        fs::write(
            &path,
            r#"{"seq_len": 12, "padding": {"mode": "backfill", "interval_minutes": 10}}"#,
        )
        .unwrap();

        let cfg = ForecastConfig::load(&path).unwrap();
        assert_eq!(cfg.seq_len, 12);
        assert_eq!(cfg.padding, PaddingPolicy::Backfill { interval_minutes: 10 });
        assert_eq!(cfg.prediction_hours, 24);
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = ForecastConfig::default();
        cfg.apply_overrides(env(&[
            ("MODEL_PATH", "/models/gru.ot"),
            ("PREDICTION_HOURS", "6"),
            ("PORT", "9000"),
            ("LOG_PRED", "1"),
        ]))
        .unwrap();
        assert_eq!(cfg.model_path, PathBuf::from("/models/gru.ot"));
        assert_eq!(cfg.prediction_hours, 6);
        assert_eq!(cfg.port, 9000);
        assert!(cfg.log_features);
        assert_eq!(cfg.seq_len, 24);
    }

    #[test]
    fn bad_values_are_rejected() {
        let mut cfg = ForecastConfig::default();
        assert!(cfg.apply_overrides(env(&[("SEQ_LEN", "many")])).is_err());

        let cfg = ForecastConfig { seq_len: 0, ..ForecastConfig::default() };
        assert!(cfg.validate().is_err());

        let cfg = ForecastConfig {
            padding: PaddingPolicy::Backfill { interval_minutes: 0 },
            ..ForecastConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = ForecastConfig {
            padding: PaddingPolicy::Backfill { interval_minutes: 10_000_000_000 },
            ..ForecastConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn backfill_without_interval_uses_collection_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forecast.json");
        fs::write(&path, r#"{"padding": {"mode": "backfill"}}"#).unwrap();

        let cfg = ForecastConfig::load(&path).unwrap();
        assert_eq!(cfg.padding, PaddingPolicy::Backfill { interval_minutes: 10 });
        cfg.validate().unwrap();
    }
}
