// ============================================
// Feedback Ingestor (反馈摄取)
// ============================================
//
// The only writer of taste profiles and bandit arms. Per event:
// 1. Drop with a warning if the user or track is unknown
// 2. Deduplicate on (user_id, track_id, timestamp) within a bounded
//    per-user window of recent keys
// 3. Under the user's write lock:
//    - EMA update of affinity, audio centroid and tolerances
//    - history + feedback summary
//    - bandit reward for the arm the track was shown under (if any)
//    - exploration rate nudge for Exploit-provenance tracks
//
// Exploration nudge (eta = adapt rate, m = signal magnitude):
//   negative: eps <- eps + eta·|m|·(eps_max − eps), streak reset
//   positive: streak += 1; once streak >= threshold
//             eps <- eps − eta·m·(eps − eps_min)

pub mod ledger;

pub use ledger::{LedgerEntry, RecommendationLedger};

use crate::config::EngineConfig;
use crate::models::{ArmKind, FeedbackEvent, Track};
use crate::services::features::FeatureStore;
use crate::services::profile::{InteractionRecord, ProfileStore, TasteProfile, UserState};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    Applied,
    /// Same (user, track, timestamp) seen before; nothing changed
    Duplicate,
    /// Unknown user or track; logged and discarded
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAck {
    pub status: FeedbackStatus,
    pub bandit_updated: bool,
    pub arm: Option<ArmKind>,
    /// Exploration rate after the update
    pub exploration_rate: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FeedbackAck {
    fn duplicate() -> Self {
        Self {
            status: FeedbackStatus::Duplicate,
            bandit_updated: false,
            arm: None,
            exploration_rate: None,
            reason: None,
        }
    }

    fn dropped(reason: String) -> Self {
        Self {
            status: FeedbackStatus::Dropped,
            bandit_updated: false,
            arm: None,
            exploration_rate: None,
            reason: Some(reason),
        }
    }
}

/// Exploration-rate adaptation parameters
#[derive(Debug, Clone, Copy)]
pub struct ExplorationAdaptation {
    pub adapt_rate: f32,
    pub rate_min: f32,
    pub rate_max: f32,
    pub positive_streak_threshold: u32,
}

impl ExplorationAdaptation {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            adapt_rate: config.exploration_adapt_rate,
            rate_min: config.exploration_rate_min,
            rate_max: config.exploration_rate_max,
            positive_streak_threshold: config.positive_streak_threshold.max(1),
        }
    }

    /// Apply one Exploit-provenance signal to the profile's exploration rate
    pub fn apply(&self, profile: &mut TasteProfile, magnitude: f32) {
        let eps = profile.exploration_rate;
        if magnitude < 0.0 {
            profile.positive_streak = 0;
            let room = (self.rate_max - eps).max(0.0);
            profile.set_exploration_rate(eps + self.adapt_rate * magnitude.abs() * room);
        } else if magnitude > 0.0 {
            profile.positive_streak = profile.positive_streak.saturating_add(1);
            if profile.positive_streak >= self.positive_streak_threshold {
                let room = (eps - self.rate_min).max(0.0);
                profile.set_exploration_rate(eps - self.adapt_rate * magnitude * room);
            }
        }
    }
}

pub struct FeedbackIngestor {
    profiles: Arc<ProfileStore>,
    features: Arc<FeatureStore>,
    ledger: Arc<RecommendationLedger>,
    /// Recent (timestamp, track) keys per user, oldest evicted first
    processed: DashMap<String, BTreeSet<(DateTime<Utc>, String)>>,
    dedup_window: usize,
    learning_rate: f32,
    adaptation: ExplorationAdaptation,
}

impl FeedbackIngestor {
    pub fn new(
        profiles: Arc<ProfileStore>,
        features: Arc<FeatureStore>,
        ledger: Arc<RecommendationLedger>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            profiles,
            features,
            ledger,
            processed: DashMap::new(),
            dedup_window: config.feedback_dedup_window.max(1),
            learning_rate: config.learning_rate,
            adaptation: ExplorationAdaptation::from_config(config),
        }
    }

    /// Remember the event's key; false when it was already seen.
    /// Only the newest `dedup_window` keys per user are kept, so a retry
    /// older than the whole window is treated as new.
    fn remember(&self, event: &FeedbackEvent) -> bool {
        let mut seen = self.processed.entry(event.user_id.clone()).or_default();
        if !seen.insert((event.timestamp, event.track_id.clone())) {
            return false;
        }
        while seen.len() > self.dedup_window {
            seen.pop_first();
        }
        true
    }

    pub async fn submit(&self, event: FeedbackEvent) -> FeedbackAck {
        if !self.profiles.contains(&event.user_id) {
            warn!(user_id = %event.user_id, track_id = %event.track_id, "Dropping feedback for unknown user");
            return FeedbackAck::dropped(format!("unknown user {}", event.user_id));
        }
        let track = match self.features.track(&event.track_id) {
            Some(track) => track,
            None => {
                warn!(user_id = %event.user_id, track_id = %event.track_id, "Dropping feedback for unknown track");
                return FeedbackAck::dropped(format!("unknown track {}", event.track_id));
            }
        };

        if !self.remember(&event) {
            debug!(
                user_id = %event.user_id,
                track_id = %event.track_id,
                "Duplicate feedback event ignored"
            );
            return FeedbackAck::duplicate();
        }

        let shown = self.ledger.lookup(&event.user_id, &event.track_id);
        let learning_rate = self.learning_rate;
        let adaptation = self.adaptation;

        let outcome = self
            .profiles
            .update(&event.user_id, |state| {
                apply_event(state, &track, &event, shown.as_ref(), learning_rate, &adaptation)
            })
            .await;

        match outcome {
            Some((bandit_updated, exploration_rate)) => {
                info!(
                    user_id = %event.user_id,
                    track_id = %event.track_id,
                    signal = event.signal.as_str(),
                    arm = shown.as_ref().map(|s| s.arm.as_str()).unwrap_or("none"),
                    exploration_rate = exploration_rate,
                    "Feedback applied"
                );
                FeedbackAck {
                    status: FeedbackStatus::Applied,
                    bandit_updated,
                    arm: shown.map(|s| s.arm),
                    exploration_rate: Some(exploration_rate),
                    reason: None,
                }
            }
            None => {
                warn!(user_id = %event.user_id, "User disappeared before feedback could be applied");
                FeedbackAck::dropped(format!("unknown user {}", event.user_id))
            }
        }
    }
}

/// Mutation applied under the user's write lock.
/// Returns (bandit updated, exploration rate after the update).
fn apply_event(
    state: &mut UserState,
    track: &Track,
    event: &FeedbackEvent,
    shown: Option<&LedgerEntry>,
    learning_rate: f32,
    adaptation: &ExplorationAdaptation,
) -> (bool, f32) {
    let magnitude = event.magnitude();
    let profile = &mut state.profile;

    let known = profile.known_artists();
    let new_artist = profile.is_new_artist(track, &known);

    profile.apply_affinity_update(track, learning_rate, magnitude);
    profile.apply_centroid_update(track, learning_rate, magnitude);
    if magnitude > 0.0 {
        profile.apply_tolerance_update(track, new_artist, learning_rate);
    }

    profile.push_history(InteractionRecord {
        track_id: track.id.clone(),
        artist_ids: track.artist_ids.clone(),
        signal: event.signal,
        shown_score: shown.map(|s| s.combined_score),
        timestamp: event.timestamp,
    });
    profile.interaction_count += 1;
    profile.feedback.record(event.signal);

    let bandit_updated = match shown {
        Some(entry) => {
            state.arms.get_mut(entry.arm).record(magnitude);
            if entry.arm == ArmKind::Exploit {
                adaptation.apply(&mut state.profile, magnitude);
            }
            true
        }
        None => false,
    };

    (bandit_updated, state.profile.exploration_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candidate, ScoreBreakdown, SignalType};
    use crate::services::features::{CatalogEntry, CatalogTrack, RawAudioFeatures, StaticCatalog};
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use uuid::Uuid;

    fn adaptation() -> ExplorationAdaptation {
        ExplorationAdaptation {
            adapt_rate: 0.1,
            rate_min: 0.05,
            rate_max: 0.6,
            positive_streak_threshold: 3,
        }
    }

    #[test]
    fn test_negative_signal_raises_exploration() {
        let mut profile = TasteProfile::new("u1", 0.3, 10);
        adaptation().apply(&mut profile, -1.0);
        assert!((profile.exploration_rate - 0.33).abs() < 1e-6);
    }

    #[test]
    fn test_positive_streak_lowers_exploration() {
        let mut profile = TasteProfile::new("u1", 0.3, 10);
        let a = adaptation();
        a.apply(&mut profile, 1.0);
        a.apply(&mut profile, 1.0);
        assert!((profile.exploration_rate - 0.3).abs() < 1e-6);
        a.apply(&mut profile, 1.0);
        assert!((profile.exploration_rate - 0.275).abs() < 1e-6);

        a.apply(&mut profile, -0.5);
        assert_eq!(profile.positive_streak, 0);
    }

    #[test]
    fn test_exploration_rate_stays_clamped() {
        let mut profile = TasteProfile::new("u1", 0.3, 10);
        let wild = ExplorationAdaptation {
            adapt_rate: 1.0,
            rate_min: -5.0,
            rate_max: 5.0,
            positive_streak_threshold: 1,
        };
        for i in 0..200 {
            let m = if i % 7 < 3 { -1.0 } else { 1.0 };
            wild.apply(&mut profile, m);
            assert!((0.0..=1.0).contains(&profile.exploration_rate));
        }
    }

    async fn fixture() -> (FeedbackIngestor, Arc<ProfileStore>, Arc<RecommendationLedger>) {
        fixture_with(EngineConfig::default()).await
    }

    async fn fixture_with(
        config: EngineConfig,
    ) -> (FeedbackIngestor, Arc<ProfileStore>, Arc<RecommendationLedger>) {
        let entries = vec![CatalogEntry {
            track: CatalogTrack {
                id: "t1".to_string(),
                artist_ids: vec!["a1".to_string()],
                genres: vec!["rock".to_string()],
                popularity: 40.0,
                released_at: Utc::now(),
            },
            audio: RawAudioFeatures::default(),
        }];
        let features = Arc::new(FeatureStore::new(
            Arc::new(StaticCatalog::new(entries)),
            Duration::from_secs(60),
            Duration::from_secs(1),
        ));
        features.candidate_pool("u1", 10).await.unwrap();

        let profiles = Arc::new(ProfileStore::from_config(&config));
        profiles.register("u1");
        let ledger = Arc::new(RecommendationLedger::new(10));
        let ingestor = FeedbackIngestor::new(Arc::clone(&profiles), features, Arc::clone(&ledger), &config);
        (ingestor, profiles, ledger)
    }

    #[tokio::test]
    async fn test_duplicate_event_is_applied_once() {
        let (ingestor, profiles, _) = fixture().await;
        let event = FeedbackEvent::new("u1", "t1", SignalType::Like, Utc::now());

        assert_eq!(ingestor.submit(event.clone()).await.status, FeedbackStatus::Applied);
        assert_eq!(ingestor.submit(event).await.status, FeedbackStatus::Duplicate);

        let state = profiles.snapshot("u1").await.unwrap();
        assert_eq!(state.profile.history.len(), 1);
        assert_eq!(state.profile.feedback.count(SignalType::Like), 1);
    }

    #[tokio::test]
    async fn test_dedup_window_is_bounded_per_user() {
        let config = EngineConfig {
            feedback_dedup_window: 2,
            ..Default::default()
        };
        let (ingestor, profiles, _) = fixture_with(config).await;
        let start = Utc::now();
        let events: Vec<FeedbackEvent> = (0..3)
            .map(|i| FeedbackEvent::new("u1", "t1", SignalType::Play, start + ChronoDuration::seconds(i)))
            .collect();

        for event in &events {
            assert_eq!(ingestor.submit(event.clone()).await.status, FeedbackStatus::Applied);
        }
        assert_eq!(ingestor.processed.get("u1").unwrap().len(), 2);

        // Newest keys are still remembered, the oldest fell out of the window
        assert_eq!(ingestor.submit(events[2].clone()).await.status, FeedbackStatus::Duplicate);
        assert_eq!(ingestor.submit(events[0].clone()).await.status, FeedbackStatus::Applied);
        assert_eq!(ingestor.processed.get("u1").unwrap().len(), 2);

        let state = profiles.snapshot("u1").await.unwrap();
        assert_eq!(state.profile.interaction_count, 4);
    }

    #[tokio::test]
    async fn test_unknown_user_and_track_are_dropped() {
        let (ingestor, _, _) = fixture().await;
        let ack = ingestor
            .submit(FeedbackEvent::new("ghost", "t1", SignalType::Play, Utc::now()))
            .await;
        assert_eq!(ack.status, FeedbackStatus::Dropped);

        let ack = ingestor
            .submit(FeedbackEvent::new("u1", "nope", SignalType::Play, Utc::now()))
            .await;
        assert_eq!(ack.status, FeedbackStatus::Dropped);
    }

    #[tokio::test]
    async fn test_bandit_updated_only_with_provenance() {
        let (ingestor, profiles, ledger) = fixture().await;
        let now = Utc::now();

        let ack = ingestor.submit(FeedbackEvent::new("u1", "t1", SignalType::Skip, now)).await;
        assert!(!ack.bandit_updated);
        let state = profiles.snapshot("u1").await.unwrap();
        assert_eq!(state.arms.total_pulls(), 0);
        // Taste still moves without provenance
        assert_eq!(state.profile.history.len(), 1);

        let track = ingestor.features.track("t1").unwrap();
        let mut shown = Candidate::new(track, ScoreBreakdown::default(), 0.6);
        shown.provenance = Some(ArmKind::ExploreNiche);
        ledger.record("u1", Uuid::new_v4(), &[shown]);

        let ack = ingestor
            .submit(FeedbackEvent::new("u1", "t1", SignalType::Like, now + ChronoDuration::seconds(1)))
            .await;
        assert!(ack.bandit_updated);
        assert_eq!(ack.arm, Some(ArmKind::ExploreNiche));

        let state = profiles.snapshot("u1").await.unwrap();
        assert_eq!(state.arms.get(ArmKind::ExploreNiche).pulls, 1);
        assert_eq!(state.profile.historical_scores(), vec![0.6]);
        // Explore arms never nudge epsilon
        assert!((state.profile.exploration_rate - 0.3).abs() < 1e-6);
    }
}
