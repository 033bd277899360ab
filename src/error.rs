use std::path::PathBuf;

use tch::TchError;
use thiserror::Error;

/// The weights container could not be turned into a usable model.
///
/// Fatal to a whole batch run: there is no meaningful partial result
/// without a model.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("no weights file at {0}")]
    NotFound(PathBuf),

    #[error("failed to read weights at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: TchError,
    },

    #[error("weights are missing tensor `{0}`")]
    MissingTensor(String),

    #[error("tensor `{name}` has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<i64>,
        actual: Vec<i64>,
    },

    #[error("warmup forward failed: {0}")]
    Probe(String),
}

/// Failure scoped to a single station. The batch run records an empty
/// prediction list for the station and moves on.
#[derive(Debug, Error)]
pub enum StationError {
    #[error("station has no observations")]
    InsufficientData,

    #[error("padding timestamp {steps_back} steps before the earliest record is out of range")]
    PaddingOutOfRange { steps_back: usize },

    #[error("model produced a non-finite value at output index {index}")]
    NumericAnomaly { index: usize },

    #[error("inference failed: {0}")]
    Inference(#[from] TchError),
}
