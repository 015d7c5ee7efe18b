// ============================================
// Taste Profile (用户口味画像)
// ============================================
//
// Per-user preference state, mutated only by the feedback ingestor:
// - Affinity vector over genres and artists (sums to 1 after every update)
// - Audio centroid of what the user responded to
// - Popularity / novelty tolerance (EMA statistics)
// - Exploration rate, clamped to [0, 1]
// - Bounded interaction history
//
// EMA update:
//   affinity <- affinity + lr * magnitude * (candidate_vector - affinity)

pub mod store;

pub use store::{ProfileStore, UserState};

use crate::models::{FeatureVector, SignalType, Track, AUDIO_DIM};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Sparse affinity vector keyed by `genre:<tag>` / `artist:<id>`
pub type AffinityVector = BTreeMap<String, f32>;

/// Total mass the affinity vector is renormalized to
pub const AFFINITY_BUDGET: f32 = 1.0;

/// Entries below this weight are dropped after renormalization
const MIN_AFFINITY: f32 = 1e-4;

pub fn genre_key(genre: &str) -> String {
    format!("genre:{}", genre)
}

pub fn artist_key(artist_id: &str) -> String {
    format!("artist:{}", artist_id)
}

/// Item-side affinity vector of a track: half the mass spread over its
/// genres, half over its artists (all of it on one side if the other is empty)
pub fn track_affinity_vector(track: &Track) -> AffinityVector {
    let mut vector = AffinityVector::new();
    let (genre_mass, artist_mass) = match (track.genres.is_empty(), track.artist_ids.is_empty()) {
        (true, true) => return vector,
        (true, false) => (0.0, 1.0),
        (false, true) => (1.0, 0.0),
        (false, false) => (0.5, 0.5),
    };

    if genre_mass > 0.0 {
        let share = genre_mass / track.genres.len() as f32;
        for genre in &track.genres {
            *vector.entry(genre_key(genre)).or_insert(0.0) += share;
        }
    }
    if artist_mass > 0.0 {
        let share = artist_mass / track.artist_ids.len() as f32;
        for artist in &track.artist_ids {
            *vector.entry(artist_key(artist)).or_insert(0.0) += share;
        }
    }
    vector
}

/// Clamp negatives away and rescale so entries sum to [`AFFINITY_BUDGET`]
pub fn renormalize(vector: &mut AffinityVector) {
    vector.retain(|_, v| v.is_finite() && *v > 0.0);
    let total: f32 = vector.values().sum();
    if total <= f32::EPSILON {
        vector.clear();
        return;
    }
    for value in vector.values_mut() {
        *value *= AFFINITY_BUDGET / total;
    }
    vector.retain(|_, v| *v >= MIN_AFFINITY);

    let total: f32 = vector.values().sum();
    if total > f32::EPSILON {
        for value in vector.values_mut() {
            *value *= AFFINITY_BUDGET / total;
        }
    }
}

/// One processed feedback interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub track_id: String,
    pub artist_ids: Vec<String>,
    pub signal: SignalType,
    /// Combined score the track had when shown, if it was shown
    pub shown_score: Option<f32>,
    pub timestamp: DateTime<Utc>,
}

/// Satisfaction tracking: signal counts and running mean magnitude
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub counts: BTreeMap<String, u64>,
    pub total: u64,
    pub mean_magnitude: f32,
}

impl FeedbackSummary {
    pub fn record(&mut self, signal: SignalType) {
        *self.counts.entry(signal.as_str().to_string()).or_insert(0) += 1;
        self.total += 1;
        self.mean_magnitude += (signal.magnitude() - self.mean_magnitude) / self.total as f32;
    }

    pub fn count(&self, signal: SignalType) -> u64 {
        self.counts.get(signal.as_str()).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TasteProfile {
    pub user_id: String,
    pub affinity: AffinityVector,
    /// Audio centroid of positively received tracks; None until the first one
    pub audio_centroid: Option<FeatureVector>,
    /// EMA of normalized popularity of positively received tracks, [0, 1]
    pub popularity_tolerance: f32,
    /// EMA of the new-artist indicator on positive feedback, [0, 1]
    pub novelty_tolerance: f32,
    /// Epsilon of the slot selector, [0, 1]
    pub exploration_rate: f32,
    /// Consecutive positive events on Exploit tracks
    pub positive_streak: u32,
    pub history: VecDeque<InteractionRecord>,
    pub history_limit: usize,
    pub interaction_count: u64,
    pub feedback: FeedbackSummary,
    pub updated_at: DateTime<Utc>,
}

impl TasteProfile {
    pub fn new(user_id: &str, exploration_rate: f32, history_limit: usize) -> Self {
        Self {
            user_id: user_id.to_string(),
            affinity: AffinityVector::new(),
            audio_centroid: None,
            popularity_tolerance: 0.5,
            novelty_tolerance: 0.5,
            exploration_rate: exploration_rate.clamp(0.0, 1.0),
            positive_streak: 0,
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
            interaction_count: 0,
            feedback: FeedbackSummary::default(),
            updated_at: Utc::now(),
        }
    }

    /// No interactions yet: the cold-start path applies
    pub fn is_cold_start(&self) -> bool {
        self.history.is_empty() && self.affinity.is_empty()
    }

    pub fn known_artists(&self) -> HashSet<String> {
        self.history
            .iter()
            .flat_map(|record| record.artist_ids.iter().cloned())
            .collect()
    }

    pub fn is_new_artist(&self, track: &Track, known: &HashSet<String>) -> bool {
        !track.artist_ids.iter().any(|a| known.contains(a))
    }

    /// Combined scores of tracks the user interacted with after seeing them
    pub fn historical_scores(&self) -> Vec<f32> {
        self.history.iter().filter_map(|r| r.shown_score).collect()
    }

    /// EMA step toward (positive magnitude) or away from (negative) a track's
    /// affinity vector, followed by renormalization
    pub fn apply_affinity_update(&mut self, track: &Track, learning_rate: f32, magnitude: f32) {
        let step = (learning_rate * magnitude).clamp(-1.0, 1.0);
        let target = track_affinity_vector(track);

        let keys: Vec<String> = self
            .affinity
            .keys()
            .chain(target.keys())
            .cloned()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        for key in keys {
            let current = self.affinity.get(&key).copied().unwrap_or(0.0);
            let goal = target.get(&key).copied().unwrap_or(0.0);
            self.affinity.insert(key, current + step * (goal - current));
        }

        renormalize(&mut self.affinity);
    }

    /// Same EMA rule over the audio centroid, clamped to [0, 1]
    pub fn apply_centroid_update(&mut self, track: &Track, learning_rate: f32, magnitude: f32) {
        let step = (learning_rate * magnitude).clamp(-1.0, 1.0);
        match self.audio_centroid.as_mut() {
            Some(centroid) => {
                for i in 0..AUDIO_DIM {
                    centroid[i] = (centroid[i] + step * (track.audio[i] - centroid[i])).clamp(0.0, 1.0);
                }
            }
            None if magnitude > 0.0 => {
                self.audio_centroid = Some(track.audio);
            }
            None => {}
        }
    }

    /// Popularity / novelty tolerance move toward what the user enjoyed
    pub fn apply_tolerance_update(&mut self, track: &Track, new_artist: bool, learning_rate: f32) {
        let lr = learning_rate.clamp(0.0, 1.0);
        self.popularity_tolerance +=
            lr * (track.normalized_popularity() - self.popularity_tolerance);
        let novelty = if new_artist { 1.0 } else { 0.0 };
        self.novelty_tolerance += lr * (novelty - self.novelty_tolerance);
        self.popularity_tolerance = self.popularity_tolerance.clamp(0.0, 1.0);
        self.novelty_tolerance = self.novelty_tolerance.clamp(0.0, 1.0);
    }

    pub fn push_history(&mut self, record: InteractionRecord) {
        self.history.push_back(record);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    pub fn set_exploration_rate(&mut self, rate: f32) {
        self.exploration_rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
    }
}
