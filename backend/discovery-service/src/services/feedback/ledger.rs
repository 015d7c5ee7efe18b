// Provenance of shown tracks, per user. Feedback is attributed to the arm
// recorded here; tracks never shown under an arm get no bandit update.

use crate::models::{ArmKind, Candidate};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub request_id: Uuid,
    pub track_id: String,
    pub arm: ArmKind,
    pub combined_score: f32,
    pub shown_at: DateTime<Utc>,
}

pub struct RecommendationLedger {
    entries: DashMap<String, VecDeque<LedgerEntry>>,
    capacity: usize,
}

impl RecommendationLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record every item that carries a provenance arm
    pub fn record(&self, user_id: &str, request_id: Uuid, items: &[Candidate]) {
        let now = Utc::now();
        let mut log = self.entries.entry(user_id.to_string()).or_default();
        for item in items {
            let Some(arm) = item.provenance else { continue };
            log.push_back(LedgerEntry {
                request_id,
                track_id: item.track_id().to_string(),
                arm,
                combined_score: item.combined_score,
                shown_at: now,
            });
        }
        while log.len() > self.capacity {
            log.pop_front();
        }
    }

    /// Most recent showing of a track to the user
    pub fn lookup(&self, user_id: &str, track_id: &str) -> Option<LedgerEntry> {
        self.entries
            .get(user_id)?
            .iter()
            .rev()
            .find(|e| e.track_id == track_id)
            .cloned()
    }

    pub fn len(&self, user_id: &str) -> usize {
        self.entries.get(user_id).map(|log| log.len()).unwrap_or(0)
    }
}
