// ============================================
// List Evaluation
// ============================================
// Per-response quality metrics, returned with every recommendation list
// and logged for offline analysis.
//
// Context relevance (per item, averaged):
//   time: morning -> energy, night -> acousticness, otherwise 0.5
//   mood: happy -> valence, sad -> 1 - valence, otherwise 0.5
//
// Overall quality is a weighted mean:
//   artist diversity 0.25, genre diversity 0.20, novelty 0.20,
//   time relevance 0.15, mood relevance 0.10, popularity spread 0.10

pub mod history;

pub use history::{MetricTrend, MetricsHistory, MetricsSummary, SummaryPeriod};

use crate::models::{audio_index, Candidate, Context, Mood, TimeBucket};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

const NEUTRAL_RELEVANCE: f32 = 0.5;

/// Largest possible variance of values in [0, 100]
const MAX_POPULARITY_VARIANCE: f32 = 2500.0;

const QUALITY_WEIGHTS: [(QualityInput, f32); 6] = [
    (QualityInput::ArtistDiversity, 0.25),
    (QualityInput::GenreDiversity, 0.20),
    (QualityInput::Novelty, 0.20),
    (QualityInput::TimeRelevance, 0.15),
    (QualityInput::MoodRelevance, 0.10),
    (QualityInput::PopularitySpread, 0.10),
];

#[derive(Debug, Clone, Copy)]
enum QualityInput {
    ArtistDiversity,
    GenreDiversity,
    Novelty,
    TimeRelevance,
    MoodRelevance,
    PopularitySpread,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListMetrics {
    pub count: usize,
    /// Unique artists / items
    pub artist_diversity: f32,
    /// Unique genres / items, capped at 1
    pub genre_diversity: f32,
    /// Mean provider popularity, 0-100
    pub mean_popularity: f32,
    pub popularity_variance: f32,
    pub new_artist_share: f32,
    pub underrepresented_share: f32,
    /// Unique release decades / items, capped at 1
    pub era_diversity: f32,
    pub time_relevance: f32,
    pub mood_relevance: f32,
    /// Weighted quality in [0, 1]
    pub overall_quality: f32,
    /// Items per provenance arm
    pub provenance: BTreeMap<String, usize>,
}

impl ListMetrics {
    fn quality_input(&self, input: QualityInput) -> f32 {
        match input {
            QualityInput::ArtistDiversity => self.artist_diversity,
            QualityInput::GenreDiversity => self.genre_diversity,
            QualityInput::Novelty => self.new_artist_share,
            QualityInput::TimeRelevance => self.time_relevance,
            QualityInput::MoodRelevance => self.mood_relevance,
            QualityInput::PopularitySpread => {
                (self.popularity_variance / MAX_POPULARITY_VARIANCE).clamp(0.0, 1.0)
            }
        }
    }

    fn overall(&self) -> f32 {
        let total: f32 = QUALITY_WEIGHTS.iter().map(|(_, w)| w).sum();
        QUALITY_WEIGHTS
            .iter()
            .map(|(input, w)| w * self.quality_input(*input))
            .sum::<f32>()
            / total
    }
}

/// How well one item fits the time of day
pub fn time_relevance(candidate: &Candidate, context: &Context) -> f32 {
    match context.time_bucket {
        TimeBucket::Morning => candidate.track.audio[audio_index::ENERGY],
        TimeBucket::Night => candidate.track.audio[audio_index::ACOUSTICNESS],
        TimeBucket::Afternoon | TimeBucket::Evening => NEUTRAL_RELEVANCE,
    }
}

/// How well one item fits the mood
pub fn mood_relevance(candidate: &Candidate, context: &Context) -> f32 {
    let valence = candidate.track.audio[audio_index::VALENCE];
    match context.mood {
        Mood::Happy => valence,
        Mood::Sad => 1.0 - valence,
        _ => NEUTRAL_RELEVANCE,
    }
}

pub fn evaluate(items: &[Candidate], context: &Context) -> ListMetrics {
    if items.is_empty() {
        return ListMetrics::default();
    }
    let n = items.len() as f32;

    let artists: HashSet<&str> = items
        .iter()
        .flat_map(|c| c.track.artist_ids.iter().map(String::as_str))
        .collect();
    let genres: HashSet<&str> = items
        .iter()
        .flat_map(|c| c.track.genres.iter().map(String::as_str))
        .collect();

    let mean_popularity = items.iter().map(|c| c.track.popularity).sum::<f32>() / n;
    let popularity_variance = items
        .iter()
        .map(|c| (c.track.popularity - mean_popularity).powi(2))
        .sum::<f32>()
        / n;

    let decades: HashSet<i32> = items
        .iter()
        .map(|c| c.track.released_at.year().div_euclid(10))
        .collect();

    let mut provenance = BTreeMap::new();
    for c in items {
        if let Some(arm) = c.provenance {
            *provenance.entry(arm.as_str().to_string()).or_insert(0) += 1;
        }
    }

    let mut metrics = ListMetrics {
        count: items.len(),
        artist_diversity: (artists.len() as f32 / n).min(1.0),
        genre_diversity: (genres.len() as f32 / n).min(1.0),
        mean_popularity,
        popularity_variance,
        new_artist_share: items.iter().filter(|c| c.new_artist).count() as f32 / n,
        underrepresented_share: items.iter().filter(|c| c.underrepresented).count() as f32 / n,
        era_diversity: (decades.len() as f32 / n).min(1.0),
        time_relevance: items.iter().map(|c| time_relevance(c, context)).sum::<f32>() / n,
        mood_relevance: items.iter().map(|c| mood_relevance(c, context)).sum::<f32>() / n,
        overall_quality: 0.0,
        provenance,
    };
    metrics.overall_quality = metrics.overall();
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Activity, ArmKind, ScoreBreakdown, Track, AUDIO_DIM};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn item(artist: &str, genre: &str, popularity: f32, arm: ArmKind) -> Candidate {
        let track = Track {
            id: format!("{}-{}", artist, genre),
            artist_ids: vec![artist.to_string()],
            genres: [genre.to_string()].into_iter().collect(),
            audio: [0.5; AUDIO_DIM],
            popularity,
            released_at: Utc::now(),
        };
        let mut c = Candidate::new(Arc::new(track), ScoreBreakdown::default(), 0.5);
        c.provenance = Some(arm);
        c
    }

    fn ctx(mood: Mood, time_bucket: TimeBucket) -> Context {
        Context::new(mood, Activity::Idle, time_bucket)
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(evaluate(&[], &ctx(Mood::Happy, TimeBucket::Morning)), ListMetrics::default());
    }

    #[test]
    fn test_metrics() {
        let mut items = vec![
            item("a1", "rock", 80.0, ArmKind::Exploit),
            item("a1", "pop", 20.0, ArmKind::Exploit),
            item("a2", "rock", 50.0, ArmKind::ExploreNiche),
            item("a3", "jazz", 10.0, ArmKind::ExploreExperimental),
        ];
        items[2].new_artist = true;
        items[3].underrepresented = true;

        let m = evaluate(&items, &ctx(Mood::Neutral, TimeBucket::Afternoon));
        assert_eq!(m.count, 4);
        assert!((m.artist_diversity - 0.75).abs() < 1e-6);
        assert!((m.genre_diversity - 0.75).abs() < 1e-6);
        assert!((m.mean_popularity - 40.0).abs() < 1e-4);
        assert!((m.popularity_variance - 750.0).abs() < 1e-2);
        assert!((m.new_artist_share - 0.25).abs() < 1e-6);
        assert_eq!(m.provenance.get("exploit"), Some(&2));
        assert_eq!(m.provenance.get("explore_niche"), Some(&1));
        assert!((m.time_relevance - 0.5).abs() < 1e-6);
        assert!((m.mood_relevance - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_context_relevance_reads_audio() {
        let mut bright = item("a1", "pop", 50.0, ArmKind::Exploit);
        let mut track = (*bright.track).clone();
        track.audio[audio_index::ENERGY] = 0.9;
        track.audio[audio_index::ACOUSTICNESS] = 0.2;
        track.audio[audio_index::VALENCE] = 0.8;
        bright.track = Arc::new(track);
        let items = vec![bright];

        let morning = evaluate(&items, &ctx(Mood::Happy, TimeBucket::Morning));
        assert!((morning.time_relevance - 0.9).abs() < 1e-6);
        assert!((morning.mood_relevance - 0.8).abs() < 1e-6);

        let night = evaluate(&items, &ctx(Mood::Sad, TimeBucket::Night));
        assert!((night.time_relevance - 0.2).abs() < 1e-6);
        assert!((night.mood_relevance - 0.2).abs() < 1e-6);
        assert!(morning.overall_quality > night.overall_quality);
    }

    #[test]
    fn test_overall_quality_is_weighted_mean() {
        let mut items = vec![
            item("a1", "rock", 0.0, ArmKind::Exploit),
            item("a2", "jazz", 100.0, ArmKind::Exploit),
        ];
        items[0].new_artist = true;
        let m = evaluate(&items, &ctx(Mood::Neutral, TimeBucket::Evening));

        // diversity 1, 1; novelty 0.5; relevance 0.5, 0.5; spread 2500 / 2500
        let expected = 0.25 + 0.20 + 0.20 * 0.5 + 0.15 * 0.5 + 0.10 * 0.5 + 0.10;
        assert!((m.overall_quality - expected).abs() < 1e-5, "{}", m.overall_quality);
        assert!((0.0..=1.0).contains(&m.overall_quality));
    }

    #[test]
    fn test_era_diversity_counts_release_decades() {
        let years = [1975, 1979, 1994, 2021];
        let items: Vec<Candidate> = years
            .iter()
            .enumerate()
            .map(|(i, year)| {
                let mut c = item(&format!("a{}", i), "rock", 50.0, ArmKind::Exploit);
                let mut track = (*c.track).clone();
                track.released_at = Utc.with_ymd_and_hms(*year, 6, 1, 0, 0, 0).unwrap();
                c.track = Arc::new(track);
                c
            })
            .collect();

        let m = evaluate(&items, &ctx(Mood::Neutral, TimeBucket::Evening));
        assert!((m.era_diversity - 0.75).abs() < 1e-6);
    }
}
