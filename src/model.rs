//! Inference-only GRU forecaster.
//!
//! `features` (Linear → ReLU → Linear → ReLU, per time step) feeds a
//! single-layer GRU; the last hidden state goes through `fc` (Linear →
//! sigmoid). Dropout from training is the identity here. Parameter names
//! follow the PyTorch `state_dict` of the trained module.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tch::{Device, Kind, TchError, Tensor};

use crate::error::{ModelLoadError, StationError};
use crate::features::FEATURE_DIM;
use crate::window::InputWindow;

pub const PROJ_IN_WEIGHT: &str = "features.0.weight";
pub const PROJ_IN_BIAS: &str = "features.0.bias";
pub const PROJ_OUT_WEIGHT: &str = "features.3.weight";
pub const PROJ_OUT_BIAS: &str = "features.3.bias";
pub const GRU_W_IH: &str = "gru.weight_ih_l0";
pub const GRU_W_HH: &str = "gru.weight_hh_l0";
pub const GRU_B_IH: &str = "gru.bias_ih_l0";
pub const GRU_B_HH: &str = "gru.bias_hh_l0";
pub const HEAD_WEIGHT: &str = "fc.0.weight";
pub const HEAD_BIAS: &str = "fc.0.bias";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub feature_dim: i64,
    pub hidden_dim: i64,
    /// One value per 10 minutes.
    pub output_len: i64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            feature_dim: 256,
            hidden_dim: 256,
            output_len: 144,
        }
    }
}

impl ModelConfig {
    /// Expected `(name, shape)` of every parameter.
    pub fn parameter_shapes(&self) -> Vec<(&'static str, Vec<i64>)> {
        let (f, h, o) = (self.feature_dim, self.hidden_dim, self.output_len);
        vec![
            (PROJ_IN_WEIGHT, vec![f, FEATURE_DIM as i64]),
            (PROJ_IN_BIAS, vec![f]),
            (PROJ_OUT_WEIGHT, vec![f, f]),
            (PROJ_OUT_BIAS, vec![f]),
            (GRU_W_IH, vec![3 * h, f]),
            (GRU_W_HH, vec![3 * h, h]),
            (GRU_B_IH, vec![3 * h]),
            (GRU_B_HH, vec![3 * h]),
            (HEAD_WEIGHT, vec![o, h]),
            (HEAD_BIAS, vec![o]),
        ]
    }
}

struct Linear {
    weight: Tensor, // [out, in]
    bias: Tensor,
}

impl Linear {
    fn forward(&self, xs: &Tensor) -> Result<Tensor, TchError> {
        xs.f_matmul(&self.weight.f_t()?)?.f_add(&self.bias)
    }
}

struct Gru {
    w_ih: Tensor,
    w_hh: Tensor,
    b_ih: Tensor,
    b_hh: Tensor,
    hidden_dim: i64,
}

impl Gru {
    /// Runs `xs: [seq, feature]` in order and returns the final hidden
    /// state `[hidden]`. Gate blocks are stacked reset, update, new.
    fn last_hidden(&self, xs: &Tensor) -> Result<Tensor, TchError> {
        let gi_all = xs.f_matmul(&self.w_ih.f_t()?)?.f_add(&self.b_ih)?;
        let seq = xs.size().first().copied().unwrap_or(0);

        let mut h = Tensor::f_zeros([self.hidden_dim], (Kind::Float, Device::Cpu))?;
        for t in 0..seq {
            let gi = gi_all.f_select(0, t)?.f_chunk(3, 0)?;
            let gh = self.w_hh.f_mv(&h)?.f_add(&self.b_hh)?.f_chunk(3, 0)?;
            if gi.len() != 3 || gh.len() != 3 {
                return Err(TchError::Shape(format!("expected 3 gate blocks, got {}", gi.len())));
            }

            let r = gi[0].f_add(&gh[0])?.f_sigmoid()?;
            let z = gi[1].f_add(&gh[1])?.f_sigmoid()?;
            let n = gi[2].f_add(&r.f_mul(&gh[2])?)?.f_tanh()?;
            // (1 - z) * n + z * h
            h = n.f_add(&z.f_mul(&h.f_sub(&n)?)?)?;
        }
        Ok(h)
    }
}

pub struct SequenceModel {
    config: ModelConfig,
    proj_in: Linear,
    proj_out: Linear,
    gru: Gru,
    head: Linear,
}

impl SequenceModel {
    /// Load weights from `.safetensors`, `.npz`, or tch's multi-tensor
    /// format, validate them against `config`, and run a warmup forward.
    pub fn load<P: AsRef<Path>>(path: P, config: ModelConfig) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ModelLoadError::NotFound(path.to_path_buf()));
        }

        let named = read_named_tensors(path).map_err(|source| ModelLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), tensors = named.len(), "read weights");

        let model = Self::from_named_tensors(named, config)?;
        model.probe()?;
        tracing::info!(?config, "warmup forward ok");
        Ok(model)
    }

    pub fn from_named_tensors<I>(named: I, config: ModelConfig) -> Result<Self, ModelLoadError>
    where
        I: IntoIterator<Item = (String, Tensor)>,
    {
        let mut map: HashMap<String, Tensor> = named.into_iter().collect();
        let mut params = HashMap::new();
        for (name, shape) in config.parameter_shapes() {
            params.insert(name, take(&mut map, name, &shape)?);
        }
        if !map.is_empty() {
            let mut extra: Vec<_> = map.keys().cloned().collect();
            extra.sort();
            tracing::warn!(?extra, "ignoring unexpected tensors in weights");
        }

        let mut p = |name: &str| {
            params
                .remove(name)
                .ok_or_else(|| ModelLoadError::MissingTensor(name.to_string()))
        };
        Ok(Self {
            config,
            proj_in: Linear { weight: p(PROJ_IN_WEIGHT)?, bias: p(PROJ_IN_BIAS)? },
            proj_out: Linear { weight: p(PROJ_OUT_WEIGHT)?, bias: p(PROJ_OUT_BIAS)? },
            gru: Gru {
                w_ih: p(GRU_W_IH)?,
                w_hh: p(GRU_W_HH)?,
                b_ih: p(GRU_B_IH)?,
                b_hh: p(GRU_B_HH)?,
                hidden_dim: config.hidden_dim,
            },
            head: Linear { weight: p(HEAD_WEIGHT)?, bias: p(HEAD_BIAS)? },
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Availability ratios at 10-minute steps after the window's last
    /// observation. Output length is `output_len`; every value is in (0, 1)
    /// for finite input.
    pub fn predict(&self, window: &InputWindow) -> Result<Vec<f32>, StationError> {
        let data = window.flatten();
        let xs = Tensor::f_from_slice(&data)?.f_reshape([window.len() as i64, FEATURE_DIM as i64])?;

        let out = tch::no_grad(|| self.forward(&xs))?;
        let ratios = Vec::<f32>::try_from(&out)?;

        if let Some(index) = ratios.iter().position(|v| !v.is_finite()) {
            return Err(StationError::NumericAnomaly { index });
        }
        Ok(ratios)
    }

    /// Shape and runtime errors surface as `TchError` so a bad window
    /// fails its own station instead of unwinding through the batch.
    fn forward(&self, xs: &Tensor) -> Result<Tensor, TchError> {
        let hidden = self.proj_in.forward(xs)?.f_relu()?;
        let projected = self.proj_out.forward(&hidden)?.f_relu()?;
        let last = self.gru.last_hidden(&projected)?;
        self.head.forward(&last)?.f_sigmoid()
    }

    fn probe(&self) -> Result<(), ModelLoadError> {
        let dummy = Tensor::zeros([1, FEATURE_DIM as i64], (Kind::Float, Device::Cpu));
        let out = tch::no_grad(|| self.forward(&dummy))
            .map_err(|e| ModelLoadError::Probe(e.to_string()))?;
        let sz = out.size();
        if sz != [self.config.output_len] {
            return Err(ModelLoadError::Probe(format!("unexpected model output size: {sz:?}")));
        }
        Ok(())
    }
}

fn read_named_tensors(path: &Path) -> Result<Vec<(String, Tensor)>, TchError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("safetensors") => Tensor::read_safetensors(path),
        Some("npz") => Tensor::read_npz(path),
        _ => Tensor::load_multi(path),
    }
}

fn take(
    map: &mut HashMap<String, Tensor>,
    name: &str,
    expected: &[i64],
) -> Result<Tensor, ModelLoadError> {
    let t = map
        .remove(name)
        .ok_or_else(|| ModelLoadError::MissingTensor(name.to_string()))?;
    let actual = t.size();
    if actual != expected {
        return Err(ModelLoadError::ShapeMismatch {
            name: name.to_string(),
            expected: expected.to_vec(),
            actual,
        });
    }
    Ok(t.to_kind(Kind::Float).to_device(Device::Cpu))
}
