// ============================================
// Recommendation Engine
// ============================================
//
// Request path (read-only against the user's committed snapshot):
//   Feature Store → Scorer Ensemble → Hybrid Combiner → Debiasing Pipeline
//   → Slot Selector → fairness final pass → ledger
//
// Feedback path: Feedback Ingestor → Taste Profile Store (+ bandit arms)
//
// Nothing here mutates shared state while ranking; an abandoned request
// leaves profiles and arms untouched.

use crate::config::EngineConfig;
use crate::error::{DiscoveryError, Result};
use crate::models::{
    ArmKind, Candidate, Category, Context, FeedbackEvent, ScoreBreakdown, Track,
};
use crate::services::context::ContextAdapter;
use crate::services::debiasing::{DebiasContext, DebiasingPipeline, FairnessConstraint};
use crate::services::evaluation::{
    evaluate, ListMetrics, MetricsHistory, MetricsSummary, SummaryPeriod,
};
use crate::services::exploration::{SelectionRequest, SlotSelector};
use crate::services::features::{CatalogSource, FeatureStore};
use crate::services::feedback::{FeedbackAck, FeedbackIngestor, RecommendationLedger};
use crate::services::profile::{AffinityVector, ProfileStore, TasteProfile, UserState};
use crate::services::ranking::{
    aggregate_neighborhood, load_pattern_model, HybridCombiner, PatternModel, ScorerEnsemble,
    ScoringContext,
};
use crate::utils::{median, stable_seed};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Experimental threshold when neither history nor pool yields a median
const DEFAULT_EXPERIMENTAL_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub user_id: String,
    pub context: Context,
    /// Defaults to `default_recommendation_count`
    pub count: Option<usize>,
    /// Single-category view instead of a blended list
    pub category: Option<Category>,
    /// Scoring reference time; defaults to now
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallReason {
    /// Every usable pool ran dry before `count` slots were filled
    ExhaustedPool,
    /// Catalog failed and no cached pool exists
    UpstreamUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub track_id: String,
    pub artist_ids: Vec<String>,
    pub genres: Vec<String>,
    pub popularity: f32,
    pub provenance: ArmKind,
    pub category: Category,
    pub scores: ScoreBreakdown,
    pub combined_score: f32,
    pub debiased_score: f32,
    pub new_artist: bool,
    pub underrepresented: bool,
}

impl Recommendation {
    fn from_candidate(candidate: &Candidate) -> Self {
        let provenance = candidate.provenance.unwrap_or(ArmKind::Exploit);
        Self {
            track_id: candidate.track.id.clone(),
            artist_ids: candidate.track.artist_ids.clone(),
            genres: candidate.track.genres.iter().cloned().collect(),
            popularity: candidate.track.popularity,
            provenance,
            category: provenance.category(),
            scores: candidate.scores,
            combined_score: candidate.combined_score,
            debiased_score: candidate.debiased_score,
            new_artist: candidate.new_artist,
            underrepresented: candidate.underrepresented,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub request_id: Uuid,
    pub user_id: String,
    pub items: Vec<Recommendation>,
    pub requested: usize,
    /// Served from a cached pool after a failed catalog refresh
    pub stale: bool,
    pub cold_start: bool,
    pub shortfall: Option<ShortfallReason>,
    /// Items per provenance arm after the fairness pass
    pub arm_counts: BTreeMap<ArmKind, usize>,
    pub metrics: ListMetrics,
}

/// Inputs of one ranking pass besides the user's snapshot
pub struct RankInput<'a> {
    pub pool: &'a [Arc<Track>],
    pub neighborhood: &'a AffinityVector,
    pub context: &'a Context,
    pub count: usize,
    pub category: Option<ArmKind>,
    pub now: DateTime<Utc>,
}

/// Output of the synchronous ranking core
#[derive(Debug, Clone)]
pub struct RankOutcome {
    pub items: Vec<Candidate>,
    pub exhausted: bool,
    pub cold_start: bool,
    pub experimental_threshold: f32,
    pub arm_counts: BTreeMap<ArmKind, usize>,
}

fn count_arms(items: &[Candidate]) -> BTreeMap<ArmKind, usize> {
    let mut counts = BTreeMap::new();
    for c in items {
        *counts.entry(c.provenance.unwrap_or(ArmKind::Exploit)).or_insert(0) += 1;
    }
    counts
}

pub struct RecommendationEngine {
    config: EngineConfig,
    profiles: Arc<ProfileStore>,
    features: Arc<FeatureStore>,
    ledger: Arc<RecommendationLedger>,
    ingestor: FeedbackIngestor,
    ensemble: ScorerEnsemble,
    combiner: HybridCombiner,
    context_adapter: ContextAdapter,
    pipeline: DebiasingPipeline,
    fairness: FairnessConstraint,
    selector: SlotSelector,
    history: MetricsHistory,
}

impl RecommendationEngine {
    /// Validates the configuration; out-of-range values are fatal
    pub fn new(config: EngineConfig, catalog: Arc<dyn CatalogSource>) -> Result<Self> {
        let model = load_pattern_model(config.pattern_model_path.as_deref());
        Self::with_pattern_model(config, catalog, model)
    }

    pub fn with_pattern_model(
        config: EngineConfig,
        catalog: Arc<dyn CatalogSource>,
        pattern_model: Arc<dyn PatternModel>,
    ) -> Result<Self> {
        config.validate()?;

        let profiles = Arc::new(ProfileStore::from_config(&config));
        let features = Arc::new(FeatureStore::from_config(catalog, &config));
        let ledger = Arc::new(RecommendationLedger::new(config.ledger_capacity));
        let ingestor = FeedbackIngestor::new(
            Arc::clone(&profiles),
            Arc::clone(&features),
            Arc::clone(&ledger),
            &config,
        );
        let ensemble = ScorerEnsemble::new(pattern_model);

        info!(
            pattern_model = ensemble.pattern_model_name(),
            policy = ?config.selection_policy,
            "Recommendation engine initialized"
        );

        Ok(Self {
            profiles,
            features,
            ledger,
            ingestor,
            ensemble,
            combiner: HybridCombiner::from_config(&config),
            context_adapter: ContextAdapter::new(),
            pipeline: DebiasingPipeline::from_config(&config),
            fairness: FairnessConstraint::from_config(&config),
            selector: SlotSelector::new(config.selection_policy),
            history: MetricsHistory::new(config.metrics_history_limit),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    pub fn features(&self) -> &Arc<FeatureStore> {
        &self.features
    }

    pub fn ledger(&self) -> &Arc<RecommendationLedger> {
        &self.ledger
    }

    pub async fn get_recommendations(
        &self,
        request: RecommendationRequest,
    ) -> Result<RecommendationResponse> {
        let user_id = request.user_id.trim();
        if user_id.is_empty() {
            return Err(DiscoveryError::Validation("user_id must not be empty".to_string()));
        }
        let requested = request.count.unwrap_or(self.config.default_recommendation_count);
        if requested == 0 {
            return Err(DiscoveryError::Validation("count must be at least 1".to_string()));
        }
        let count = requested.min(self.config.max_recommendation_count);
        let request_id = Uuid::new_v4();
        let now = request.as_of.unwrap_or_else(Utc::now);

        self.profiles.register(user_id);
        let state = self.profiles.snapshot_or_default(user_id).await;

        let pool = match self
            .features
            .candidate_pool(user_id, self.config.candidate_pool_size)
            .await
        {
            Ok(pool) => pool,
            Err(DiscoveryError::TransientUpstream(reason)) => {
                warn!(user_id = %user_id, reason = %reason, "Returning degraded empty response");
                return Ok(RecommendationResponse {
                    request_id,
                    user_id: user_id.to_string(),
                    items: Vec::new(),
                    requested: count,
                    stale: true,
                    cold_start: state.profile.is_cold_start(),
                    shortfall: Some(ShortfallReason::UpstreamUnavailable),
                    arm_counts: BTreeMap::new(),
                    metrics: ListMetrics::default(),
                });
            }
            Err(e) => return Err(e),
        };

        let neighbors = self
            .profiles
            .neighbors(user_id, &state.profile.affinity, self.config.neighbor_count)
            .await;
        let neighborhood = aggregate_neighborhood(&neighbors);

        let outcome = self.rank(
            &state,
            &RankInput {
                pool: &pool.tracks,
                neighborhood: &neighborhood,
                context: &request.context,
                count,
                category: request.category.map(|c| c.arm()),
                now,
            },
        );

        self.ledger.record(user_id, request_id, &outcome.items);
        let metrics = evaluate(&outcome.items, &request.context);
        self.history.record(user_id, now, metrics.clone());

        let shortfall = outcome.exhausted.then_some(ShortfallReason::ExhaustedPool);

        info!(
            user_id = %user_id,
            request_id = %request_id,
            returned = outcome.items.len(),
            requested = count,
            stale = pool.stale,
            cold_start = outcome.cold_start,
            arms = ?outcome.arm_counts,
            artist_diversity = metrics.artist_diversity,
            underrepresented_share = metrics.underrepresented_share,
            overall_quality = metrics.overall_quality,
            "Recommendations served"
        );

        Ok(RecommendationResponse {
            request_id,
            user_id: user_id.to_string(),
            items: outcome.items.iter().map(Recommendation::from_candidate).collect(),
            requested: count,
            stale: pool.stale,
            cold_start: outcome.cold_start,
            shortfall,
            arm_counts: outcome.arm_counts,
            metrics,
        })
    }

    /// Deterministic ranking core: identical state and input give identical
    /// output
    pub fn rank(&self, state: &UserState, input: &RankInput<'_>) -> RankOutcome {
        let RankInput {
            pool,
            neighborhood,
            context,
            count,
            category,
            now,
        } = *input;
        let profile = &state.profile;
        let cold_start = profile.is_cold_start();

        let mut seen = HashSet::new();
        let tracks: Vec<Arc<Track>> = pool
            .iter()
            .filter(|t| seen.insert(t.id.clone()))
            .cloned()
            .collect();

        let adjustment = self.context_adapter.adjust(context);
        let weights = self.combiner.weights_for(&adjustment);
        let known_artists = profile.known_artists();

        let scoring = ScoringContext {
            context,
            adjustment: &adjustment,
            neighborhood,
            neighbor_blend: self.config.neighbor_blend,
            known_artists: &known_artists,
            now,
        };
        let breakdowns = match self.personalized_scores(profile, &tracks, &scoring) {
            Ok(scores) => scores,
            Err(e) => {
                info!(user_id = %profile.user_id, reason = %e, "Cold start, using neutral scores");
                vec![
                    ScoreBreakdown {
                        collaborative: 0.5,
                        content: 0.5,
                        pattern: 0.5,
                    };
                    tracks.len()
                ]
            }
        };

        let candidates: Vec<Candidate> = tracks
            .into_iter()
            .zip(breakdowns)
            .map(|(track, scores)| {
                let combined = self.combiner.combine(&scores, &weights);
                let new_artist = profile.is_new_artist(&track, &known_artists);
                let mut candidate = Candidate::new(track, scores, combined);
                candidate.new_artist = new_artist;
                candidate
            })
            .collect();

        let experimental_threshold = median(&profile.historical_scores())
            .or_else(|| {
                let pool_scores: Vec<f32> = candidates.iter().map(|c| c.combined_score).collect();
                median(&pool_scores)
            })
            .unwrap_or(DEFAULT_EXPERIMENTAL_THRESHOLD);

        let ranked = self.pipeline.run(
            candidates,
            &DebiasContext {
                target_size: count,
                cold_start,
            },
        );

        let seed = self.config.selector_seed.unwrap_or_else(|| {
            stable_seed(&(
                profile.user_id.as_str(),
                profile.interaction_count,
                state.arms.total_pulls(),
                profile.exploration_rate.to_bits(),
                context,
            ))
        });

        let selection = self.selector.select(&SelectionRequest {
            ranked: &ranked,
            count,
            exploration_rate: profile.exploration_rate,
            arms: &state.arms,
            adjustment: &adjustment,
            experimental_threshold,
            category,
            exploit_only: cold_start,
            seed,
        });

        // Fairness final pass over the chosen slots; a category view only
        // swaps in candidates from that category's pool, and a swapped-in
        // candidate keeps the slot's arm only if it belongs to that arm's pool
        let mut items = selection.items;
        let mut remaining: Vec<Candidate> = selection
            .remaining
            .into_iter()
            .filter(|c| {
                category
                    .map(|arm| SlotSelector::eligible(arm, c, experimental_threshold))
                    .unwrap_or(true)
            })
            .collect();
        let swaps = self.fairness.enforce(&mut items, &mut remaining, |incoming, slot| {
            match slot {
                Some(arm) if SlotSelector::eligible(arm, incoming, experimental_threshold) => Some(arm),
                _ => Some(ArmKind::Exploit),
            }
        });
        let arm_counts = count_arms(&items);

        debug!(
            user_id = %profile.user_id,
            selected = items.len(),
            fairness_swaps = swaps,
            arms = ?arm_counts,
            "Selection complete"
        );

        RankOutcome {
            items,
            exhausted: selection.exhausted,
            cold_start,
            experimental_threshold,
            arm_counts,
        }
    }

    fn personalized_scores(
        &self,
        profile: &TasteProfile,
        tracks: &[Arc<Track>],
        scoring: &ScoringContext<'_>,
    ) -> Result<Vec<ScoreBreakdown>> {
        if profile.is_cold_start() {
            return Err(DiscoveryError::InsufficientData(format!(
                "no interactions for user {}",
                profile.user_id
            )));
        }
        Ok(self.ensemble.score(profile, tracks, scoring))
    }

    /// Averages and trends of the user's recent list evaluations
    pub fn metrics_summary(&self, user_id: &str, period: SummaryPeriod) -> Result<MetricsSummary> {
        self.history
            .summary(user_id, period, Utc::now())
            .ok_or_else(|| DiscoveryError::NotFound(format!("no evaluations for user {}", user_id)))
    }

    pub async fn submit_feedback(&self, event: FeedbackEvent) -> FeedbackAck {
        self.ingestor.submit(event).await
    }

    pub async fn export_state(&self, user_id: &str) -> Result<String> {
        self.profiles.export(user_id).await
    }

    pub async fn import_state(&self, user_id: &str, json: &str) -> Result<()> {
        self.profiles.import(user_id, json).await
    }
}
