//! Bike-share station availability forecasting.
//!
//! Station histories are turned into fixed-length feature windows, run
//! through a GRU forecaster, and decoded into hourly predictions keyed by
//! station id.

pub mod config;
pub mod data;
pub mod decoder;
pub mod error;
pub mod features;
pub mod model;
pub mod predictor;
pub mod types;
pub mod window;

pub use config::ForecastConfig;
pub use decoder::HorizonDecoder;
pub use error::{ModelLoadError, StationError};
pub use features::FeatureVector;
pub use model::{ModelConfig, SequenceModel};
pub use predictor::{predict_all_stations, BatchPredictor, BatchReport};
pub use types::{Observation, Prediction, PredictionMap, PredictionOut, StationHistories, StationSnapshot};
pub use window::{InputWindow, PaddingPolicy, WindowBuilder};
