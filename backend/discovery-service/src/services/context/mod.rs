// ============================================
// Context Adapter (情境适配)
// ============================================
//
// Maps (mood, activity, time bucket) to additive perturbations of the
// combiner weights, per-dimension emphasis for content matching, and
// multipliers on the exploration arms. Stateless; recomputed per request.

use crate::models::{audio_index, Activity, ArmKind, Context, FeatureVector, Mood, TimeBucket, AUDIO_DIM};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContextAdjustment {
    pub collaborative_delta: f32,
    pub content_delta: f32,
    pub pattern_delta: f32,
    /// Weight of each audio dimension in the content distance, >= 0
    pub audio_emphasis: FeatureVector,
    pub niche_multiplier: f32,
    pub experimental_multiplier: f32,
}

impl Default for ContextAdjustment {
    fn default() -> Self {
        Self {
            collaborative_delta: 0.0,
            content_delta: 0.0,
            pattern_delta: 0.0,
            audio_emphasis: [1.0; AUDIO_DIM],
            niche_multiplier: 1.0,
            experimental_multiplier: 1.0,
        }
    }
}

impl ContextAdjustment {
    /// Scale on an arm's selection weight; Exploit is never scaled
    pub fn arm_multiplier(&self, arm: ArmKind) -> f32 {
        match arm {
            ArmKind::Exploit => 1.0,
            ArmKind::ExploreNiche => self.niche_multiplier,
            ArmKind::ExploreExperimental => self.experimental_multiplier,
        }
    }

    fn emphasize(&mut self, dim: usize, factor: f32) {
        self.audio_emphasis[dim] *= factor;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextAdapter;

impl ContextAdapter {
    pub fn new() -> Self {
        Self
    }

    pub fn adjust(&self, context: &Context) -> ContextAdjustment {
        let mut adj = ContextAdjustment::default();

        match context.activity {
            Activity::Workout => {
                adj.content_delta += 0.15;
                adj.emphasize(audio_index::ENERGY, 2.0);
                adj.emphasize(audio_index::TEMPO, 2.0);
            }
            Activity::Party => {
                adj.pattern_delta += 0.1;
                adj.emphasize(audio_index::DANCEABILITY, 2.0);
                adj.emphasize(audio_index::ENERGY, 1.5);
            }
            Activity::Study => {
                adj.content_delta += 0.1;
                adj.emphasize(audio_index::INSTRUMENTALNESS, 2.0);
                adj.emphasize(audio_index::ACOUSTICNESS, 1.5);
                adj.experimental_multiplier *= 0.5;
            }
            Activity::Commute => {
                adj.collaborative_delta += 0.05;
            }
            Activity::Idle => {}
        }

        match context.mood {
            Mood::Energetic => {
                adj.content_delta += 0.1;
                adj.emphasize(audio_index::ENERGY, 1.5);
            }
            Mood::Happy => {
                adj.emphasize(audio_index::VALENCE, 1.5);
            }
            Mood::Sad => {
                // No experimental picks for a sad listener
                adj.experimental_multiplier = 0.0;
            }
            Mood::Relaxed => {
                adj.emphasize(audio_index::ACOUSTICNESS, 1.5);
                adj.experimental_multiplier *= 0.5;
            }
            Mood::Neutral => {}
        }

        match context.time_bucket {
            TimeBucket::Morning => adj.emphasize(audio_index::ENERGY, 1.25),
            TimeBucket::Night => adj.emphasize(audio_index::ACOUSTICNESS, 1.25),
            TimeBucket::Afternoon | TimeBucket::Evening => {}
        }

        adj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(mood: Mood, activity: Activity) -> Context {
        Context::new(mood, activity, TimeBucket::Afternoon)
    }

    #[test]
    fn test_neutral_context_is_identity() {
        let adj = ContextAdapter::new().adjust(&ctx(Mood::Neutral, Activity::Idle));
        assert_eq!(adj, ContextAdjustment::default());
    }

    #[test]
    fn test_workout_boosts_content_and_energy() {
        let adj = ContextAdapter::new().adjust(&ctx(Mood::Neutral, Activity::Workout));
        assert!(adj.content_delta > 0.0);
        assert_eq!(adj.audio_emphasis[audio_index::ENERGY], 2.0);
        assert_eq!(adj.audio_emphasis[audio_index::TEMPO], 2.0);
        assert_eq!(adj.audio_emphasis[audio_index::VALENCE], 1.0);
    }

    #[test]
    fn test_sad_mood_suppresses_experimental_arm() {
        let adj = ContextAdapter::new().adjust(&ctx(Mood::Sad, Activity::Party));
        assert_eq!(adj.arm_multiplier(ArmKind::ExploreExperimental), 0.0);
        assert_eq!(adj.arm_multiplier(ArmKind::ExploreNiche), 1.0);
        assert_eq!(adj.arm_multiplier(ArmKind::Exploit), 1.0);
    }

    #[test]
    fn test_night_emphasizes_acoustic() {
        let adj = ContextAdapter::new().adjust(&Context::new(Mood::Relaxed, Activity::Idle, TimeBucket::Night));
        assert!((adj.audio_emphasis[audio_index::ACOUSTICNESS] - 1.875).abs() < 1e-6);
        assert!((adj.experimental_multiplier - 0.5).abs() < 1e-6);
    }
}
