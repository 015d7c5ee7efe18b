/// Ranking Module
///
/// Scores candidate tracks against a taste profile and blends the scores.
///
/// # Architecture
/// - **Scorers**: collaborative (affinity cosine), content (audio centroid
///   distance) and pattern (opaque model over profile/track/context features)
/// - **Model Layer**: `PatternModel` implementations, a static heuristic or a
///   small feed-forward network loaded from JSON weights
/// - **Combiner**: weighted sum with context-perturbed, renormalized weights
///
/// # Workflow
/// 1. Build the scoring context (neighbourhood affinity, context adjustment)
/// 2. Run every scorer over the whole batch
/// 3. Blend per track → combined score in [0, 1]
pub mod combiner;
pub mod model;
pub mod scorer;

pub use combiner::{CombinerWeights, HybridCombiner};
pub use model::{load_pattern_model, FeedForwardModel, HeuristicModel, PatternModel};
pub use scorer::{
    aggregate_neighborhood, CollaborativeScorer, ContentScorer, PatternScorer, Scorer, ScoringContext,
};

use crate::models::{ScoreBreakdown, Track};
use crate::services::profile::TasteProfile;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model loading failed: {0}")]
    Load(String),

    #[error("Invalid model weights: {0}")]
    InvalidWeights(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// The three scorers run side by side over one batch
pub struct ScorerEnsemble {
    collaborative: CollaborativeScorer,
    content: ContentScorer,
    pattern: PatternScorer,
}

impl ScorerEnsemble {
    pub fn new(pattern_model: Arc<dyn PatternModel>) -> Self {
        Self {
            collaborative: CollaborativeScorer,
            content: ContentScorer,
            pattern: PatternScorer::new(pattern_model),
        }
    }

    pub fn pattern_model_name(&self) -> &'static str {
        self.pattern.model_name()
    }

    pub fn score(
        &self,
        profile: &TasteProfile,
        tracks: &[Arc<Track>],
        ctx: &ScoringContext<'_>,
    ) -> Vec<ScoreBreakdown> {
        let collaborative = self.collaborative.score_batch(profile, tracks, ctx);
        let content = self.content.score_batch(profile, tracks, ctx);
        let pattern = self.pattern.score_batch(profile, tracks, ctx);

        debug!(
            user_id = %profile.user_id,
            tracks = tracks.len(),
            "Scored candidate batch"
        );

        collaborative
            .into_iter()
            .zip(content)
            .zip(pattern)
            .map(|((collaborative, content), pattern)| ScoreBreakdown {
                collaborative,
                content,
                pattern,
            })
            .collect()
    }
}
