use super::{DebiasContext, DebiasStage};
use crate::config::EngineConfig;
use crate::models::{sort_ranked, Candidate};
use crate::utils::clamp_unit;

/// Popularity normalization
///
/// penalty(p) = weight · (p / 100)^alpha, monotonically increasing in p
/// score'     = score · (1 − penalty)
#[derive(Debug, Clone, Copy)]
pub struct PopularityNormalization {
    weight: f32,
    alpha: f32,
}

impl PopularityNormalization {
    pub fn new(weight: f32, alpha: f32) -> Self {
        Self {
            weight: weight.clamp(0.0, 1.0),
            alpha: alpha.max(f32::EPSILON),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.popularity_penalty_weight, config.popularity_alpha)
    }

    pub fn penalty(&self, popularity: f32) -> f32 {
        let p = (popularity / 100.0).clamp(0.0, 1.0);
        self.weight * p.powf(self.alpha)
    }
}

impl DebiasStage for PopularityNormalization {
    fn name(&self) -> &'static str {
        "popularity_normalization"
    }

    fn apply(&self, mut candidates: Vec<Candidate>, _ctx: &DebiasContext) -> Vec<Candidate> {
        for c in candidates.iter_mut() {
            let penalty = self.penalty(c.track.popularity);
            c.debiased_score = clamp_unit(c.debiased_score * (1.0 - penalty));
            c.marginal_score = None;
        }
        sort_ranked(&mut candidates);
        candidates
    }
}
