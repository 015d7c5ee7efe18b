// ============================================
// Debiasing Pipeline (去偏重排)
// ============================================
//
// Ordered re-ranking stages over the combined-score list:
// 1. Popularity normalization: score · (1 − weight · (popularity/100)^alpha)
// 2. Diversity promotion: MMR over artist identity + genre overlap
// 3. Novelty promotion: score += novelty_weight for new-artist tracks
// 4. Fairness constraint: minimum share of underrepresented tracks in the top N
//
// Every stage keeps debiased scores in [0, 1] and is deterministic for a
// fixed input list and fixed weights.

pub mod diversity;
pub mod fairness;
pub mod novelty;
pub mod popularity;

pub use diversity::DiversityPromotion;
pub use fairness::FairnessConstraint;
pub use novelty::NoveltyPromotion;
pub use popularity::PopularityNormalization;

use crate::config::EngineConfig;
use crate::models::Candidate;
use tracing::debug;

/// Per-request inputs of the debiasing stages
#[derive(Debug, Clone, Copy)]
pub struct DebiasContext {
    /// Size of the list the caller will take from the top
    pub target_size: usize,
    /// User has no interactions yet
    pub cold_start: bool,
}

pub trait DebiasStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, candidates: Vec<Candidate>, ctx: &DebiasContext) -> Vec<Candidate>;
}

pub struct DebiasingPipeline {
    stages: Vec<Box<dyn DebiasStage>>,
}

impl DebiasingPipeline {
    pub fn new(stages: Vec<Box<dyn DebiasStage>>) -> Self {
        Self { stages }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(vec![
            Box::new(PopularityNormalization::from_config(config)),
            Box::new(DiversityPromotion::from_config(config)),
            Box::new(NoveltyPromotion::from_config(config)),
            Box::new(FairnessConstraint::from_config(config)),
        ])
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn run(&self, candidates: Vec<Candidate>, ctx: &DebiasContext) -> Vec<Candidate> {
        self.stages.iter().fold(candidates, |list, stage| {
            let out = stage.apply(list, ctx);
            debug!(
                stage = stage.name(),
                candidates = out.len(),
                top = out.first().map(|c| c.track_id()).unwrap_or(""),
                "Debiasing stage applied"
            );
            out
        })
    }
}
