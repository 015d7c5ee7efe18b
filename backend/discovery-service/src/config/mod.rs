use crate::error::{DiscoveryError, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
    pub http_host: String,
    pub http_port: u16,
    /// JSON catalog served by the bundled static catalog source
    pub catalog_fixture_path: Option<String>,
}

/// How explore arms are weighed against each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    EpsilonGreedy,
    ThompsonSampling,
}

/// Tunables of the scoring, debiasing and selection pipeline.
///
/// Every field can be overridden through `discovery.toml` or
/// `DISCOVERY_ENGINE__<FIELD>` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Base combiner weight of the collaborative scorer (>= 0)
    pub collaborative_weight: f32,
    /// Base combiner weight of the content-based scorer (>= 0)
    pub content_weight: f32,
    /// Base combiner weight of the neural-pattern scorer (>= 0)
    pub pattern_weight: f32,

    /// Strength of the popularity penalty, [0, 1]
    pub popularity_penalty_weight: f32,
    /// Exponent of the penalty curve `(popularity / 100)^alpha`, (0, 4]
    pub popularity_alpha: f32,
    /// MMR similarity penalty, [0, 1]
    pub diversity_weight: f32,
    /// MMR similarity penalty for users without history, [0, 1]
    pub cold_start_diversity_weight: f32,
    /// Max consecutive tracks sharing an artist during MMR (0 disables)
    pub max_consecutive_per_artist: usize,
    /// Additive boost for tracks by artists absent from history, [0, 1]
    pub novelty_weight: f32,
    /// Minimum fraction of underrepresented tracks in the final list, [0, 1]
    pub fairness_floor: f32,
    /// Popularity below which a track is underrepresented, [0, 100]
    pub underrepresented_popularity_threshold: f32,

    /// Exploration rate assigned to new users
    pub exploration_rate: f32,
    pub exploration_rate_min: f32,
    pub exploration_rate_max: f32,
    /// Step size of the feedback-driven exploration nudge, [0, 1]
    pub exploration_adapt_rate: f32,
    /// Consecutive positive Exploit events before exploration decays (>= 1)
    pub positive_streak_threshold: u32,
    pub selection_policy: SelectionPolicy,
    /// Fixed selector seed; derived from user state when unset
    pub selector_seed: Option<u64>,

    /// EMA learning rate for taste updates, (0, 1]
    pub learning_rate: f32,
    /// Bounded interaction history length (>= 1)
    pub history_limit: usize,
    /// Similar users aggregated by the collaborative scorer
    pub neighbor_count: usize,
    /// Share of the neighbourhood vector in the collaborative blend, [0, 1]
    pub neighbor_blend: f32,

    pub candidate_pool_size: usize,
    pub default_recommendation_count: usize,
    pub max_recommendation_count: usize,
    /// Candidate pool cache TTL
    pub cache_ttl_secs: u64,
    /// How long past TTL a cached pool may still be served as stale
    pub stale_grace_secs: u64,
    /// Upstream catalog timeout
    pub fetch_timeout_ms: u64,
    /// Provenance entries kept per user
    pub ledger_capacity: usize,
    /// Recent feedback keys remembered per user for de-duplication
    pub feedback_dedup_window: usize,
    /// Evaluation snapshots kept per user
    pub metrics_history_limit: usize,

    /// Feed-forward pattern model weights (JSON); heuristic model when unset
    pub pattern_model_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            collaborative_weight: 0.3,
            content_weight: 0.3,
            pattern_weight: 0.4,
            popularity_penalty_weight: 0.5,
            popularity_alpha: 0.7,
            diversity_weight: 0.4,
            cold_start_diversity_weight: 0.8,
            max_consecutive_per_artist: 2,
            novelty_weight: 0.3,
            fairness_floor: 0.3,
            underrepresented_popularity_threshold: 30.0,
            exploration_rate: 0.3,
            exploration_rate_min: 0.05,
            exploration_rate_max: 0.6,
            exploration_adapt_rate: 0.1,
            positive_streak_threshold: 3,
            selection_policy: SelectionPolicy::EpsilonGreedy,
            selector_seed: None,
            learning_rate: 0.1,
            history_limit: 50,
            neighbor_count: 10,
            neighbor_blend: 0.3,
            candidate_pool_size: 100,
            default_recommendation_count: 20,
            max_recommendation_count: 100,
            cache_ttl_secs: 900,
            fetch_timeout_ms: 2000,
            stale_grace_secs: 3600,
            ledger_capacity: 500,
            feedback_dedup_window: 1000,
            metrics_history_limit: 100,
            pattern_model_path: None,
        }
    }
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(DiscoveryError::Configuration(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, weight) in [
            ("collaborative_weight", self.collaborative_weight),
            ("content_weight", self.content_weight),
            ("pattern_weight", self.pattern_weight),
        ] {
            if !(weight >= 0.0) || !weight.is_finite() {
                return Err(DiscoveryError::Configuration(format!(
                    "{} must be a non-negative number, got {}",
                    name, weight
                )));
            }
        }
        if self.collaborative_weight + self.content_weight + self.pattern_weight <= 0.0 {
            return Err(DiscoveryError::Configuration(
                "Combiner weights must not all be zero".to_string(),
            ));
        }

        check_unit("popularity_penalty_weight", self.popularity_penalty_weight)?;
        check_unit("diversity_weight", self.diversity_weight)?;
        check_unit("cold_start_diversity_weight", self.cold_start_diversity_weight)?;
        check_unit("novelty_weight", self.novelty_weight)?;
        check_unit("fairness_floor", self.fairness_floor)?;
        check_unit("exploration_rate", self.exploration_rate)?;
        check_unit("exploration_rate_min", self.exploration_rate_min)?;
        check_unit("exploration_rate_max", self.exploration_rate_max)?;
        check_unit("exploration_adapt_rate", self.exploration_adapt_rate)?;
        check_unit("neighbor_blend", self.neighbor_blend)?;

        if !(self.popularity_alpha > 0.0 && self.popularity_alpha <= 4.0) {
            return Err(DiscoveryError::Configuration(format!(
                "popularity_alpha must be within (0, 4], got {}",
                self.popularity_alpha
            )));
        }

        if !(0.0..=100.0).contains(&self.underrepresented_popularity_threshold) {
            return Err(DiscoveryError::Configuration(format!(
                "underrepresented_popularity_threshold must be within [0, 100], got {}",
                self.underrepresented_popularity_threshold
            )));
        }

        if self.exploration_rate_min > self.exploration_rate_max
            || self.exploration_rate < self.exploration_rate_min
            || self.exploration_rate > self.exploration_rate_max
        {
            return Err(DiscoveryError::Configuration(format!(
                "exploration_rate {} must lie within [{}, {}]",
                self.exploration_rate, self.exploration_rate_min, self.exploration_rate_max
            )));
        }

        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(DiscoveryError::Configuration(format!(
                "learning_rate must be within (0, 1], got {}",
                self.learning_rate
            )));
        }

        if self.positive_streak_threshold == 0 {
            return Err(DiscoveryError::Configuration(
                "positive_streak_threshold must be at least 1".to_string(),
            ));
        }

        if self.history_limit == 0
            || self.ledger_capacity == 0
            || self.feedback_dedup_window == 0
            || self.metrics_history_limit == 0
        {
            return Err(DiscoveryError::Configuration(
                "history_limit, ledger_capacity, feedback_dedup_window and metrics_history_limit must be at least 1".to_string(),
            ));
        }

        if self.candidate_pool_size == 0
            || self.default_recommendation_count == 0
            || self.default_recommendation_count > self.max_recommendation_count
        {
            return Err(DiscoveryError::Configuration(format!(
                "Recommendation counts invalid: pool={}, default={}, max={}",
                self.candidate_pool_size,
                self.default_recommendation_count,
                self.max_recommendation_count
            )));
        }

        if self.fetch_timeout_ms == 0 {
            return Err(DiscoveryError::Configuration(
                "fetch_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Config {
    pub fn from_env() -> std::result::Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();

        let engine = EngineConfig::default();

        let config = config::Config::builder()
            .set_default("service.service_name", "discovery-service")?
            .set_default("service.http_host", "0.0.0.0")?
            .set_default("service.http_port", 8012)?
            .set_default("engine.collaborative_weight", engine.collaborative_weight as f64)?
            .set_default("engine.content_weight", engine.content_weight as f64)?
            .set_default("engine.pattern_weight", engine.pattern_weight as f64)?
            .set_default(
                "engine.popularity_penalty_weight",
                engine.popularity_penalty_weight as f64,
            )?
            .set_default("engine.popularity_alpha", engine.popularity_alpha as f64)?
            .set_default("engine.diversity_weight", engine.diversity_weight as f64)?
            .set_default(
                "engine.cold_start_diversity_weight",
                engine.cold_start_diversity_weight as f64,
            )?
            .set_default(
                "engine.max_consecutive_per_artist",
                engine.max_consecutive_per_artist as u64,
            )?
            .set_default("engine.novelty_weight", engine.novelty_weight as f64)?
            .set_default("engine.fairness_floor", engine.fairness_floor as f64)?
            .set_default(
                "engine.underrepresented_popularity_threshold",
                engine.underrepresented_popularity_threshold as f64,
            )?
            .set_default("engine.exploration_rate", engine.exploration_rate as f64)?
            .set_default("engine.exploration_rate_min", engine.exploration_rate_min as f64)?
            .set_default("engine.exploration_rate_max", engine.exploration_rate_max as f64)?
            .set_default(
                "engine.exploration_adapt_rate",
                engine.exploration_adapt_rate as f64,
            )?
            .set_default(
                "engine.positive_streak_threshold",
                engine.positive_streak_threshold as u64,
            )?
            .set_default("engine.selection_policy", "epsilon_greedy")?
            .set_default("engine.learning_rate", engine.learning_rate as f64)?
            .set_default("engine.history_limit", engine.history_limit as u64)?
            .set_default("engine.neighbor_count", engine.neighbor_count as u64)?
            .set_default("engine.neighbor_blend", engine.neighbor_blend as f64)?
            .set_default("engine.candidate_pool_size", engine.candidate_pool_size as u64)?
            .set_default(
                "engine.default_recommendation_count",
                engine.default_recommendation_count as u64,
            )?
            .set_default(
                "engine.max_recommendation_count",
                engine.max_recommendation_count as u64,
            )?
            .set_default("engine.cache_ttl_secs", engine.cache_ttl_secs)?
            .set_default("engine.fetch_timeout_ms", engine.fetch_timeout_ms)?
            .set_default("engine.stale_grace_secs", engine.stale_grace_secs)?
            .set_default("engine.ledger_capacity", engine.ledger_capacity as u64)?
            .set_default(
                "engine.feedback_dedup_window",
                engine.feedback_dedup_window as u64,
            )?
            .set_default(
                "engine.metrics_history_limit",
                engine.metrics_history_limit as u64,
            )?
            .add_source(config::File::with_name("discovery").required(false))
            .add_source(
                config::Environment::with_prefix("DISCOVERY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.http_port == 0 {
            return Err(DiscoveryError::Configuration(
                "HTTP port must be greater than 0".to_string(),
            ));
        }

        self.engine.validate()
    }
}
