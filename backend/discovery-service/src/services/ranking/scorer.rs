/// Candidate Scoring Module
///
/// Each scorer maps (profile, track, context) to a relevance in [0, 1] for a
/// whole batch at once. Scorers are pure: identical inputs give identical
/// outputs.

use super::model::{
    HeuristicModel, PatternModel, COL_NEW_ARTIST, COL_NOVELTY_TOLERANCE, COL_POPULARITY,
    COL_POPULARITY_TOLERANCE, COL_RECENCY, COL_TARGET_ENERGY, PATTERN_INPUT_DIM,
};
use crate::models::{Activity, Context, Mood, Track, AUDIO_DIM};
use crate::services::context::ContextAdjustment;
use crate::services::profile::{renormalize, track_affinity_vector, AffinityVector, TasteProfile};
use crate::utils::{clamp_unit, sparse_cosine};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// Neutral score used when a scorer has nothing to go on
const NEUTRAL_SCORE: f32 = 0.5;

/// Per-request inputs shared by all scorers
pub struct ScoringContext<'a> {
    pub context: &'a Context,
    pub adjustment: &'a ContextAdjustment,
    /// Similarity-weighted affinity of the user's nearest neighbours
    pub neighborhood: &'a AffinityVector,
    /// Share of the neighbourhood in the collaborative query vector, [0, 1]
    pub neighbor_blend: f32,
    pub known_artists: &'a HashSet<String>,
    /// Reference time for release recency
    pub now: DateTime<Utc>,
}

pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;

    fn score_batch(
        &self,
        profile: &TasteProfile,
        tracks: &[Arc<Track>],
        ctx: &ScoringContext<'_>,
    ) -> Vec<f32>;
}

/// Similarity-weighted mean of neighbour affinity vectors, renormalized
pub fn aggregate_neighborhood(neighbors: &[(f32, AffinityVector)]) -> AffinityVector {
    let mut aggregate = AffinityVector::new();
    for (similarity, vector) in neighbors {
        for (key, value) in vector {
            *aggregate.entry(key.clone()).or_insert(0.0) += similarity * value;
        }
    }
    renormalize(&mut aggregate);
    aggregate
}

// ============================================
// Collaborative
// ============================================

/// Cosine between the user's (neighbourhood-blended) affinity and the
/// track's genre/artist vector
#[derive(Debug, Clone, Copy, Default)]
pub struct CollaborativeScorer;

impl CollaborativeScorer {
    fn query_vector(profile: &TasteProfile, ctx: &ScoringContext<'_>) -> AffinityVector {
        if ctx.neighborhood.is_empty() || ctx.neighbor_blend <= 0.0 {
            return profile.affinity.clone();
        }
        let blend = ctx.neighbor_blend.clamp(0.0, 1.0);
        let mut query: AffinityVector = profile
            .affinity
            .iter()
            .map(|(k, v)| (k.clone(), (1.0 - blend) * v))
            .collect();
        for (key, value) in ctx.neighborhood {
            *query.entry(key.clone()).or_insert(0.0) += blend * value;
        }
        query
    }
}

impl Scorer for CollaborativeScorer {
    fn name(&self) -> &'static str {
        "collaborative"
    }

    fn score_batch(
        &self,
        profile: &TasteProfile,
        tracks: &[Arc<Track>],
        ctx: &ScoringContext<'_>,
    ) -> Vec<f32> {
        let query = Self::query_vector(profile, ctx);
        if query.is_empty() {
            return vec![NEUTRAL_SCORE; tracks.len()];
        }
        tracks
            .iter()
            .map(|track| sparse_cosine(&query, &track_affinity_vector(track)))
            .collect()
    }
}

// ============================================
// Content
// ============================================

/// 1 - emphasis-weighted RMS distance between the user's audio centroid and
/// the track's audio vector
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentScorer;

impl Scorer for ContentScorer {
    fn name(&self) -> &'static str {
        "content"
    }

    fn score_batch(
        &self,
        profile: &TasteProfile,
        tracks: &[Arc<Track>],
        ctx: &ScoringContext<'_>,
    ) -> Vec<f32> {
        let centroid = match profile.audio_centroid {
            Some(c) => c,
            None => return vec![NEUTRAL_SCORE; tracks.len()],
        };
        let emphasis = ctx.adjustment.audio_emphasis;
        let total_emphasis: f32 = emphasis.iter().map(|e| e.max(0.0)).sum();
        if total_emphasis <= f32::EPSILON {
            return vec![NEUTRAL_SCORE; tracks.len()];
        }

        tracks
            .iter()
            .map(|track| {
                let weighted: f32 = (0..AUDIO_DIM)
                    .map(|i| emphasis[i].max(0.0) * (centroid[i] - track.audio[i]).powi(2))
                    .sum();
                clamp_unit(1.0 - (weighted / total_emphasis).sqrt())
            })
            .collect()
    }
}

// ============================================
// Pattern
// ============================================

/// Target energy implied by the listening context
fn target_energy(context: &Context) -> f32 {
    match (context.activity, context.mood) {
        (Activity::Workout, _) | (Activity::Party, _) | (_, Mood::Energetic) => 0.9,
        (Activity::Study, _) | (_, Mood::Relaxed) | (_, Mood::Sad) => 0.3,
        _ => 0.5,
    }
}

fn target_valence(context: &Context) -> f32 {
    match context.mood {
        Mood::Happy => 0.8,
        Mood::Sad => 0.3,
        _ => 0.5,
    }
}

/// Feature row layout (PATTERN_INPUT_DIM):
/// [audio (9), popularity, new_artist, recency, popularity_tolerance,
///  novelty_tolerance, target_energy, target_valence]
pub fn pattern_features(
    profile: &TasteProfile,
    tracks: &[Arc<Track>],
    ctx: &ScoringContext<'_>,
) -> Array2<f32> {
    let energy = target_energy(ctx.context);
    let valence = target_valence(ctx.context);

    Array2::from_shape_fn((tracks.len(), PATTERN_INPUT_DIM), |(row, col)| {
        let track = &tracks[row];
        match col {
            c if c < AUDIO_DIM => track.audio[c],
            COL_POPULARITY => track.normalized_popularity(),
            COL_NEW_ARTIST => {
                if profile.is_new_artist(track, ctx.known_artists) {
                    1.0
                } else {
                    0.0
                }
            }
            COL_RECENCY => {
                let age_days = (ctx.now - track.released_at).num_days().max(0) as f32;
                (-age_days / 365.0).exp()
            }
            COL_POPULARITY_TOLERANCE => profile.popularity_tolerance,
            COL_NOVELTY_TOLERANCE => profile.novelty_tolerance,
            COL_TARGET_ENERGY => energy,
            _ => valence,
        }
    })
}

/// Opaque model over profile/track/context features
pub struct PatternScorer {
    model: Arc<dyn PatternModel>,
    fallback: HeuristicModel,
}

impl PatternScorer {
    pub fn new(model: Arc<dyn PatternModel>) -> Self {
        Self {
            model,
            fallback: HeuristicModel,
        }
    }

    pub fn model_name(&self) -> &'static str {
        self.model.name()
    }
}

impl Scorer for PatternScorer {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn score_batch(
        &self,
        profile: &TasteProfile,
        tracks: &[Arc<Track>],
        ctx: &ScoringContext<'_>,
    ) -> Vec<f32> {
        if tracks.is_empty() {
            return Vec::new();
        }
        let features = pattern_features(profile, tracks, ctx);
        let scores = match self.model.predict(&features) {
            Ok(scores) => scores,
            Err(e) => {
                warn!(model = self.model.name(), error = %e, "Pattern model failed, using heuristic");
                match self.fallback.predict(&features) {
                    Ok(scores) => scores,
                    Err(_) => return vec![NEUTRAL_SCORE; tracks.len()],
                }
            }
        };
        scores.iter().map(|s| clamp_unit(*s)).collect()
    }
}
