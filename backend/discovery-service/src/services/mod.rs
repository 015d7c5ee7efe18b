pub mod context;
pub mod debiasing;
pub mod engine;
pub mod evaluation;
pub mod exploration;
pub mod features;
pub mod feedback;
pub mod profile;
pub mod ranking;

pub use context::{ContextAdapter, ContextAdjustment};
pub use debiasing::{DebiasingPipeline, FairnessConstraint};
pub use engine::{
    RankInput, RankOutcome, Recommendation, RecommendationEngine, RecommendationRequest,
    RecommendationResponse, ShortfallReason,
};
pub use evaluation::{evaluate, ListMetrics, MetricsHistory, MetricsSummary, SummaryPeriod};
pub use exploration::{ArmSet, BanditArm, SlotSelector};
pub use features::{CatalogSource, FeatureStore, StaticCatalog};
pub use feedback::{FeedbackAck, FeedbackIngestor, FeedbackStatus, RecommendationLedger};
pub use profile::{ProfileStore, TasteProfile, UserState};
pub use ranking::{HybridCombiner, ScorerEnsemble};
