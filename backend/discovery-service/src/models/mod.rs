use chrono::{DateTime, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Number of normalized audio dimensions per track
pub const AUDIO_DIM: usize = 9;

/// Normalized audio features, every entry in [0, 1]
///
/// Layout: [acousticness, danceability, energy, instrumentalness, liveness,
/// speechiness, valence, tempo, loudness]
pub type FeatureVector = [f32; AUDIO_DIM];

pub mod audio_index {
    pub const ACOUSTICNESS: usize = 0;
    pub const DANCEABILITY: usize = 1;
    pub const ENERGY: usize = 2;
    pub const INSTRUMENTALNESS: usize = 3;
    pub const LIVENESS: usize = 4;
    pub const SPEECHINESS: usize = 5;
    pub const VALENCE: usize = 6;
    pub const TEMPO: usize = 7;
    pub const LOUDNESS: usize = 8;
}

/// Catalog track after normalization. Immutable once built by the feature store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub artist_ids: Vec<String>,
    pub genres: BTreeSet<String>,
    pub audio: FeatureVector,
    /// Provider popularity, 0-100
    pub popularity: f32,
    pub released_at: DateTime<Utc>,
}

impl Track {
    /// Popularity mapped to [0, 1]
    pub fn normalized_popularity(&self) -> f32 {
        (self.popularity / 100.0).clamp(0.0, 1.0)
    }

    pub fn shares_artist(&self, other: &Track) -> bool {
        self.artist_ids.iter().any(|a| other.artist_ids.contains(a))
    }

    /// Jaccard overlap of genre tags
    pub fn genre_overlap(&self, other: &Track) -> f32 {
        if self.genres.is_empty() && other.genres.is_empty() {
            return 0.0;
        }
        let shared = self.genres.intersection(&other.genres).count() as f32;
        let union = self.genres.union(&other.genres).count() as f32;
        shared / union
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Happy,
    Sad,
    Energetic,
    Relaxed,
    #[default]
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Workout,
    Study,
    Party,
    Commute,
    #[default]
    #[serde(rename = "none")]
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeBucket {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => TimeBucket::Morning,
            12..=16 => TimeBucket::Afternoon,
            17..=21 => TimeBucket::Evening,
            _ => TimeBucket::Night,
        }
    }

    pub fn now() -> Self {
        Self::from_hour(Local::now().hour())
    }
}

/// Per-request listening context. Never persisted with the profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    pub mood: Mood,
    pub activity: Activity,
    pub time_bucket: TimeBucket,
}

impl Context {
    pub fn new(mood: Mood, activity: Activity, time_bucket: TimeBucket) -> Self {
        Self {
            mood,
            activity,
            time_bucket,
        }
    }

    /// Context with the time bucket taken from the local clock
    pub fn now(mood: Mood, activity: Activity) -> Self {
        Self::new(mood, activity, TimeBucket::now())
    }
}

/// Bandit arm, doubling as the provenance tag of a shown track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmKind {
    Exploit,
    ExploreNiche,
    ExploreExperimental,
}

impl ArmKind {
    pub const ALL: [ArmKind; 3] = [
        ArmKind::Exploit,
        ArmKind::ExploreNiche,
        ArmKind::ExploreExperimental,
    ];

    pub const EXPLORE: [ArmKind; 2] = [ArmKind::ExploreNiche, ArmKind::ExploreExperimental];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArmKind::Exploit => "exploit",
            ArmKind::ExploreNiche => "explore_niche",
            ArmKind::ExploreExperimental => "explore_experimental",
        }
    }

    pub fn is_exploration(&self) -> bool {
        !matches!(self, ArmKind::Exploit)
    }

    pub fn category(&self) -> Category {
        match self {
            ArmKind::Exploit => Category::ForYou,
            ArmKind::ExploreNiche => Category::NewAndNiche,
            ArmKind::ExploreExperimental => Category::Experimental,
        }
    }
}

/// Single-category view requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    ForYou,
    NewAndNiche,
    Experimental,
}

impl Category {
    pub fn arm(&self) -> ArmKind {
        match self {
            Category::ForYou => ArmKind::Exploit,
            Category::NewAndNiche => ArmKind::ExploreNiche,
            Category::Experimental => ArmKind::ExploreExperimental,
        }
    }
}

/// Raw outputs of the three scorers, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub collaborative: f32,
    pub content: f32,
    pub pattern: f32,
}

/// A track plus everything derived for it during one request
#[derive(Debug, Clone)]
pub struct Candidate {
    pub track: Arc<Track>,
    pub scores: ScoreBreakdown,
    /// Weighted blend of the scorer outputs, in [0, 1]
    pub combined_score: f32,
    /// Score after the debiasing stages, in [0, 1]
    pub debiased_score: f32,
    /// Marginal relevance assigned by diversity promotion; drives order afterwards
    pub marginal_score: Option<f32>,
    /// None of the track's artists appear in the user's history
    pub new_artist: bool,
    /// Track falls in the low-popularity fairness bucket
    pub underrepresented: bool,
    pub provenance: Option<ArmKind>,
}

impl Candidate {
    pub fn new(track: Arc<Track>, scores: ScoreBreakdown, combined_score: f32) -> Self {
        let combined_score = combined_score.clamp(0.0, 1.0);
        Self {
            track,
            scores,
            combined_score,
            debiased_score: combined_score,
            marginal_score: None,
            new_artist: false,
            underrepresented: false,
            provenance: None,
        }
    }

    pub fn track_id(&self) -> &str {
        &self.track.id
    }

    /// Key the current ranked order is sorted by
    pub fn order_key(&self) -> f32 {
        self.marginal_score.unwrap_or(self.debiased_score)
    }
}

/// Sort by order key descending; ties go to new-artist tracks, then track id.
pub fn sort_ranked(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.order_key()
            .partial_cmp(&a.order_key())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.new_artist.cmp(&a.new_artist))
            .then_with(|| a.track.id.cmp(&b.track.id))
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Play,
    Skip,
    Like,
    Dislike,
    Complete,
}

impl SignalType {
    pub const ALL: [SignalType; 5] = [
        SignalType::Play,
        SignalType::Skip,
        SignalType::Like,
        SignalType::Dislike,
        SignalType::Complete,
    ];

    /// Signed strength of the signal, in [-1, 1]
    pub fn magnitude(&self) -> f32 {
        match self {
            SignalType::Play => 0.3,
            SignalType::Complete => 0.6,
            SignalType::Like => 1.0,
            SignalType::Skip => -0.5,
            SignalType::Dislike => -1.0,
        }
    }

    pub fn is_positive(&self) -> bool {
        self.magnitude() > 0.0
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Play => "play",
            SignalType::Skip => "skip",
            SignalType::Like => "like",
            SignalType::Dislike => "dislike",
            SignalType::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub user_id: String,
    pub track_id: String,
    pub signal: SignalType,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackEvent {
    pub fn new(user_id: &str, track_id: &str, signal: SignalType, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            track_id: track_id.to_string(),
            signal,
            timestamp,
        }
    }

    pub fn magnitude(&self) -> f32 {
        self.signal.magnitude()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, artist: &str, genres: &[&str]) -> Track {
        Track {
            id: id.to_string(),
            artist_ids: vec![artist.to_string()],
            genres: genres.iter().map(|g| g.to_string()).collect(),
            audio: [0.5; AUDIO_DIM],
            popularity: 50.0,
            released_at: Utc::now(),
        }
    }

    #[test]
    fn test_time_bucket_from_hour() {
        assert_eq!(TimeBucket::from_hour(6), TimeBucket::Morning);
        assert_eq!(TimeBucket::from_hour(11), TimeBucket::Morning);
        assert_eq!(TimeBucket::from_hour(12), TimeBucket::Afternoon);
        assert_eq!(TimeBucket::from_hour(17), TimeBucket::Evening);
        assert_eq!(TimeBucket::from_hour(22), TimeBucket::Night);
        assert_eq!(TimeBucket::from_hour(3), TimeBucket::Night);
    }

    #[test]
    fn test_genre_overlap() {
        let a = track("t1", "a1", &["rock", "indie"]);
        let b = track("t2", "a2", &["rock", "pop"]);
        assert!((a.genre_overlap(&b) - 1.0 / 3.0).abs() < 1e-6);
        assert!(!a.shares_artist(&b));
    }

    #[test]
    fn test_activity_none_round_trip() {
        let json = serde_json::to_string(&Activity::Idle).unwrap();
        assert_eq!(json, "\"none\"");
        let parsed: Activity = serde_json::from_str("\"workout\"").unwrap();
        assert_eq!(parsed, Activity::Workout);
    }

    #[test]
    fn test_sort_ranked_prefers_new_artist_on_tie() {
        let mut known = Candidate::new(Arc::new(track("a", "x", &[])), ScoreBreakdown::default(), 0.5);
        let mut fresh = Candidate::new(Arc::new(track("b", "y", &[])), ScoreBreakdown::default(), 0.5);
        known.new_artist = false;
        fresh.new_artist = true;
        let mut list = vec![known, fresh];
        sort_ranked(&mut list);
        assert_eq!(list[0].track_id(), "b");
    }

    #[test]
    fn test_signal_magnitudes() {
        assert!(SignalType::Like.is_positive());
        assert!(!SignalType::Skip.is_positive());
        for signal in SignalType::ALL {
            assert!((-1.0..=1.0).contains(&signal.magnitude()));
        }
    }
}
