/// Pattern Model Inference Module
///
/// Opaque relevance models behind the pattern scorer. Supports a small
/// feed-forward network loaded from JSON weights and a static heuristic that
/// also serves as fallback when the network is unavailable.

use super::ModelError;
use crate::models::{audio_index, AUDIO_DIM};
use ndarray::{Array1, Array2};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Feature row width: audio (9) + popularity, new_artist, recency,
/// popularity_tolerance, novelty_tolerance, target_energy, target_valence
pub const PATTERN_INPUT_DIM: usize = 16;

pub(crate) const COL_POPULARITY: usize = AUDIO_DIM;
pub(crate) const COL_NEW_ARTIST: usize = AUDIO_DIM + 1;
pub(crate) const COL_RECENCY: usize = AUDIO_DIM + 2;
pub(crate) const COL_POPULARITY_TOLERANCE: usize = AUDIO_DIM + 3;
pub(crate) const COL_NOVELTY_TOLERANCE: usize = AUDIO_DIM + 4;
pub(crate) const COL_TARGET_ENERGY: usize = AUDIO_DIM + 5;
pub(crate) const COL_TARGET_VALENCE: usize = AUDIO_DIM + 6;

pub trait PatternModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// One relevance estimate per row of `features` (batch × PATTERN_INPUT_DIM)
    fn predict(&self, features: &Array2<f32>) -> Result<Array1<f32>, ModelError>;
}

fn check_width(features: &Array2<f32>) -> Result<(), ModelError> {
    if features.ncols() != PATTERN_INPUT_DIM {
        return Err(ModelError::InvalidInput(format!(
            "Expected {} features, got {}",
            PATTERN_INPUT_DIM,
            features.ncols()
        )));
    }
    Ok(())
}

/// Static heuristic
///
/// Formula: `0.3·energy_fit + 0.2·valence_fit + 0.2·popularity_fit + 0.2·novelty_fit + 0.1·recency`
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicModel;

impl PatternModel for HeuristicModel {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn predict(&self, features: &Array2<f32>) -> Result<Array1<f32>, ModelError> {
        check_width(features)?;

        let scores = features
            .rows()
            .into_iter()
            .map(|row| {
                let energy_fit = 1.0 - (row[audio_index::ENERGY] - row[COL_TARGET_ENERGY]).abs();
                let valence_fit = 1.0 - (row[audio_index::VALENCE] - row[COL_TARGET_VALENCE]).abs();
                let popularity_fit = 1.0 - (row[COL_POPULARITY] - row[COL_POPULARITY_TOLERANCE]).abs();
                let novelty_fit = if row[COL_NEW_ARTIST] > 0.5 {
                    row[COL_NOVELTY_TOLERANCE]
                } else {
                    1.0 - row[COL_NOVELTY_TOLERANCE]
                };

                (0.3 * energy_fit
                    + 0.2 * valence_fit
                    + 0.2 * popularity_fit
                    + 0.2 * novelty_fit
                    + 0.1 * row[COL_RECENCY])
                    .clamp(0.0, 1.0)
            })
            .collect::<Vec<f32>>();

        Ok(Array1::from(scores))
    }
}

#[derive(Debug, Deserialize)]
struct DenseLayerSpec {
    /// out × in
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct NetworkSpec {
    layers: Vec<DenseLayerSpec>,
}

/// Feed-forward network: ReLU hidden layers, sigmoid output of width 1
#[derive(Debug, Clone)]
pub struct FeedForwardModel {
    layers: Vec<(Array2<f32>, Array1<f32>)>,
}

impl FeedForwardModel {
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let spec: NetworkSpec =
            serde_json::from_str(json).map_err(|e| ModelError::InvalidWeights(e.to_string()))?;
        if spec.layers.is_empty() {
            return Err(ModelError::InvalidWeights("network has no layers".to_string()));
        }

        let mut layers = Vec::with_capacity(spec.layers.len());
        let mut width = PATTERN_INPUT_DIM;
        for (i, layer) in spec.layers.into_iter().enumerate() {
            let rows = layer.weights.len();
            if rows == 0 || layer.bias.len() != rows {
                return Err(ModelError::InvalidWeights(format!(
                    "layer {}: {} weight rows, {} biases",
                    i,
                    rows,
                    layer.bias.len()
                )));
            }
            if layer.weights.iter().any(|r| r.len() != width) {
                return Err(ModelError::InvalidWeights(format!(
                    "layer {}: expected input width {}",
                    i, width
                )));
            }

            let flat: Vec<f32> = layer.weights.into_iter().flatten().collect();
            let weights = Array2::from_shape_vec((rows, width), flat)
                .map_err(|e| ModelError::InvalidWeights(e.to_string()))?;
            layers.push((weights, Array1::from(layer.bias)));
            width = rows;
        }

        if width != 1 {
            return Err(ModelError::InvalidWeights(format!(
                "output layer width {} (expected 1)",
                width
            )));
        }

        Ok(Self { layers })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ModelError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }
}

impl PatternModel for FeedForwardModel {
    fn name(&self) -> &'static str {
        "feed_forward"
    }

    fn predict(&self, features: &Array2<f32>) -> Result<Array1<f32>, ModelError> {
        check_width(features)?;

        let last = self.layers.len() - 1;
        let mut activations = features.to_owned();
        for (i, (weights, bias)) in self.layers.iter().enumerate() {
            let mut z = activations.dot(&weights.t());
            z += bias;
            if i == last {
                z.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp()));
            } else {
                z.mapv_inplace(|v| v.max(0.0));
            }
            activations = z;
        }

        Ok(activations.column(0).to_owned())
    }
}

/// Feed-forward model from `path`, or the heuristic when unset or unloadable
pub fn load_pattern_model(path: Option<&str>) -> Arc<dyn PatternModel> {
    match path {
        None => {
            debug!("Using heuristic pattern model");
            Arc::new(HeuristicModel)
        }
        Some(path) => match FeedForwardModel::load(path) {
            Ok(model) => {
                info!(path = %path, layers = model.depth(), "Loaded feed-forward pattern model");
                Arc::new(model)
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to load pattern model, falling back to heuristic");
                Arc::new(HeuristicModel)
            }
        },
    }
}
