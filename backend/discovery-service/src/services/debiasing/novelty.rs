use super::{DebiasContext, DebiasStage};
use crate::config::EngineConfig;
use crate::models::{sort_ranked, Candidate};
use crate::utils::clamp_unit;

/// Novelty promotion: `score += novelty_weight` for tracks whose artists are
/// absent from the user's history, clamped to 1. The boost is also added to
/// the marginal order key so MMR order is preserved among equals.
#[derive(Debug, Clone, Copy)]
pub struct NoveltyPromotion {
    weight: f32,
}

impl NoveltyPromotion {
    pub fn new(weight: f32) -> Self {
        Self {
            weight: weight.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.novelty_weight)
    }
}

impl DebiasStage for NoveltyPromotion {
    fn name(&self) -> &'static str {
        "novelty_promotion"
    }

    fn apply(&self, mut candidates: Vec<Candidate>, _ctx: &DebiasContext) -> Vec<Candidate> {
        for c in candidates.iter_mut().filter(|c| c.new_artist) {
            c.debiased_score = clamp_unit(c.debiased_score + self.weight);
            c.marginal_score = c.marginal_score.map(|m| m + self.weight);
        }
        sort_ranked(&mut candidates);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{candidate, ids};
    use super::*;

    fn ctx() -> DebiasContext {
        DebiasContext {
            target_size: 10,
            cold_start: false,
        }
    }

    #[test]
    fn test_new_artist_boosted_and_clamped() {
        let mut fresh = candidate("fresh", "new", &["rock"], 10.0, 0.9);
        fresh.new_artist = true;
        let known = candidate("known", "old", &["rock"], 10.0, 0.95);

        let out = NoveltyPromotion::new(0.3).apply(vec![known, fresh], &ctx());
        assert_eq!(ids(&out), vec!["fresh", "known"]);
        assert_eq!(out[0].debiased_score, 1.0);
        assert_eq!(out[1].debiased_score, 0.95);
    }

    #[test]
    fn test_equal_scores_never_dominated_by_known_artist() {
        // "a-known" sorts first by id; the new artist must still lead
        let known = candidate("a-known", "old", &[], 10.0, 0.5);
        let mut fresh = candidate("z-fresh", "new", &[], 10.0, 0.5);
        fresh.new_artist = true;

        for weight in [0.0, 0.1] {
            let out = NoveltyPromotion::new(weight).apply(vec![known.clone(), fresh.clone()], &ctx());
            assert_eq!(out[0].track_id(), "z-fresh");
        }
    }
}
