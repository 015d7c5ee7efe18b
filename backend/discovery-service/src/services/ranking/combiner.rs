/// Hybrid Combiner
///
/// combined = w_collab·collaborative + w_content·content + w_pattern·pattern
///
/// Base weights come from configuration; the context adjustment adds
/// deltas, negatives clamp to zero and the result is renormalized to sum 1.

use crate::config::EngineConfig;
use crate::models::ScoreBreakdown;
use crate::services::context::ContextAdjustment;
use crate::utils::clamp_unit;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CombinerWeights {
    pub collaborative: f32,
    pub content: f32,
    pub pattern: f32,
}

impl CombinerWeights {
    pub fn sum(&self) -> f32 {
        self.collaborative + self.content + self.pattern
    }

    /// Clamp negatives to zero and rescale to sum 1; equal thirds when nothing is left
    pub fn normalized(self) -> Self {
        let clamped = Self {
            collaborative: self.collaborative.max(0.0),
            content: self.content.max(0.0),
            pattern: self.pattern.max(0.0),
        };
        let total = clamped.sum();
        if !total.is_finite() || total <= f32::EPSILON {
            return Self {
                collaborative: 1.0 / 3.0,
                content: 1.0 / 3.0,
                pattern: 1.0 / 3.0,
            };
        }
        Self {
            collaborative: clamped.collaborative / total,
            content: clamped.content / total,
            pattern: clamped.pattern / total,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HybridCombiner {
    base: CombinerWeights,
}

impl HybridCombiner {
    pub fn new(base: CombinerWeights) -> Self {
        Self {
            base: base.normalized(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(CombinerWeights {
            collaborative: config.collaborative_weight,
            content: config.content_weight,
            pattern: config.pattern_weight,
        })
    }

    pub fn base_weights(&self) -> CombinerWeights {
        self.base
    }

    pub fn weights_for(&self, adjustment: &ContextAdjustment) -> CombinerWeights {
        CombinerWeights {
            collaborative: self.base.collaborative + adjustment.collaborative_delta,
            content: self.base.content + adjustment.content_delta,
            pattern: self.base.pattern + adjustment.pattern_delta,
        }
        .normalized()
    }

    pub fn combine(&self, scores: &ScoreBreakdown, weights: &CombinerWeights) -> f32 {
        clamp_unit(
            weights.collaborative * scores.collaborative
                + weights.content * scores.content
                + weights.pattern * scores.pattern,
        )
    }
}
