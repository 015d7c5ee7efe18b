/// Metric History
///
/// Keeps the newest `limit` list evaluations per user and summarizes them
/// over a time period: mean, standard deviation and linear trend (slope per
/// evaluation, positive means improving over time).
use super::ListMetrics;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

type MetricReader = fn(&ListMetrics) -> f32;

const TRACKED: [(&str, MetricReader); 8] = [
    ("artist_diversity", |m| m.artist_diversity),
    ("genre_diversity", |m| m.genre_diversity),
    ("era_diversity", |m| m.era_diversity),
    ("new_artist_share", |m| m.new_artist_share),
    ("underrepresented_share", |m| m.underrepresented_share),
    ("time_relevance", |m| m.time_relevance),
    ("mood_relevance", |m| m.mood_relevance),
    ("overall_quality", |m| m.overall_quality),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryPeriod {
    Week,
    Month,
    #[default]
    All,
}

impl SummaryPeriod {
    fn cutoff(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            SummaryPeriod::Week => Some(now - Duration::days(7)),
            SummaryPeriod::Month => Some(now - Duration::days(30)),
            SummaryPeriod::All => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTrend {
    pub mean: f32,
    pub std_dev: f32,
    pub slope: f32,
}

impl MetricTrend {
    fn from_values(values: &[f32]) -> Self {
        let n = values.len() as f32;
        let mean = values.iter().sum::<f32>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        Self {
            mean,
            std_dev: variance.sqrt(),
            slope: slope(values, mean),
        }
    }
}

/// Least-squares slope of values against their index
fn slope(values: &[f32], mean: f32) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let x_mean = (values.len() - 1) as f32 / 2.0;
    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0f32, 0.0f32), |(num, den), (i, y)| {
            let dx = i as f32 - x_mean;
            (num + dx * (y - mean), den + dx * dx)
        });
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub user_id: String,
    pub period: SummaryPeriod,
    pub samples: usize,
    pub metrics: BTreeMap<String, MetricTrend>,
}

#[derive(Debug, Clone)]
struct MetricSample {
    at: DateTime<Utc>,
    metrics: ListMetrics,
}

pub struct MetricsHistory {
    limit: usize,
    entries: DashMap<String, VecDeque<MetricSample>>,
}

impl MetricsHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            entries: DashMap::new(),
        }
    }

    pub fn record(&self, user_id: &str, at: DateTime<Utc>, metrics: ListMetrics) {
        let mut samples = self.entries.entry(user_id.to_string()).or_default();
        samples.push_back(MetricSample { at, metrics });
        while samples.len() > self.limit {
            samples.pop_front();
        }
    }

    /// None when the user has no evaluations inside the period
    pub fn summary(
        &self,
        user_id: &str,
        period: SummaryPeriod,
        now: DateTime<Utc>,
    ) -> Option<MetricsSummary> {
        let samples = self.entries.get(user_id)?;
        let cutoff = period.cutoff(now);
        let window: Vec<&ListMetrics> = samples
            .iter()
            .filter(|s| cutoff.map(|c| s.at > c).unwrap_or(true))
            .map(|s| &s.metrics)
            .collect();
        if window.is_empty() {
            return None;
        }

        let metrics = TRACKED
            .iter()
            .map(|(name, read)| {
                let values: Vec<f32> = window.iter().map(|m| read(m)).collect();
                (name.to_string(), MetricTrend::from_values(&values))
            })
            .collect();

        Some(MetricsSummary {
            user_id: user_id.to_string(),
            period,
            samples: window.len(),
            metrics,
        })
    }
}
