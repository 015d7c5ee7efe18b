// ============================================
// Taste Profile Store
// ============================================
//
// Per-user state (taste profile + bandit arms) behind an explicit
// single-writer discipline:
// - Writers serialize on a per-user mutex, mutate a private copy and
//   commit it by swapping the snapshot pointer
// - Readers clone the last committed snapshot and never wait for a writer
//   to finish its update
//
// Only the feedback ingestor writes. Ranking reads snapshots.

use super::{AffinityVector, TasteProfile};
use crate::config::EngineConfig;
use crate::error::{DiscoveryError, Result};
use crate::services::exploration::ArmSet;
use crate::utils::sparse_cosine;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Everything persisted for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    pub profile: TasteProfile,
    pub arms: ArmSet,
}

impl UserState {
    pub fn new(user_id: &str, exploration_rate: f32, history_limit: usize) -> Self {
        Self {
            profile: TasteProfile::new(user_id, exploration_rate, history_limit),
            arms: ArmSet::default(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.profile.user_id
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut state: UserState = serde_json::from_str(json)?;
        let rate = state.profile.exploration_rate;
        state.profile.set_exploration_rate(rate);
        super::renormalize(&mut state.profile.affinity);
        Ok(state)
    }
}

struct UserSlot {
    committed: RwLock<Arc<UserState>>,
    writer: Mutex<()>,
}

impl UserSlot {
    fn new(state: UserState) -> Self {
        Self {
            committed: RwLock::new(Arc::new(state)),
            writer: Mutex::new(()),
        }
    }
}

pub struct ProfileStore {
    users: DashMap<String, Arc<UserSlot>>,
    /// Exploration rate for newly registered users
    exploration_rate: f32,
    history_limit: usize,
}

impl ProfileStore {
    pub fn new(exploration_rate: f32, history_limit: usize) -> Self {
        Self {
            users: DashMap::new(),
            exploration_rate,
            history_limit,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.exploration_rate, config.history_limit)
    }

    fn slot(&self, user_id: &str) -> Option<Arc<UserSlot>> {
        self.users.get(user_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    /// Default state for a user that has none yet
    pub fn fresh_state(&self, user_id: &str) -> UserState {
        UserState::new(user_id, self.exploration_rate, self.history_limit)
    }

    /// Create an empty profile for the user if absent. Returns true when created.
    pub fn register(&self, user_id: &str) -> bool {
        let mut created = false;
        self.users.entry(user_id.to_string()).or_insert_with(|| {
            created = true;
            Arc::new(UserSlot::new(self.fresh_state(user_id)))
        });
        if created {
            info!(user_id = %user_id, "Registered new taste profile");
        }
        created
    }

    /// Last committed state of a user
    pub async fn snapshot(&self, user_id: &str) -> Option<Arc<UserState>> {
        let slot = self.slot(user_id)?;
        let state = slot.committed.read().await;
        Some(Arc::clone(&state))
    }

    /// Committed state, or an uncommitted default for unknown users
    pub async fn snapshot_or_default(&self, user_id: &str) -> Arc<UserState> {
        match self.snapshot(user_id).await {
            Some(state) => state,
            None => Arc::new(self.fresh_state(user_id)),
        }
    }

    /// Apply a mutation under the user's exclusive write lock and commit it.
    /// Returns None for unknown users.
    pub async fn update<F, T>(&self, user_id: &str, mutate: F) -> Option<T>
    where
        F: FnOnce(&mut UserState) -> T,
    {
        let slot = self.slot(user_id)?;
        let _writer = slot.writer.lock().await;

        let current = Arc::clone(&*slot.committed.read().await);
        let mut next = (*current).clone();
        let output = mutate(&mut next);
        next.profile.updated_at = Utc::now();

        *slot.committed.write().await = Arc::new(next);
        debug!(user_id = %user_id, "Committed user state");
        Some(output)
    }

    /// The `k` users whose affinity vectors are most similar to `affinity`,
    /// excluding `user_id` and users with zero similarity
    pub async fn neighbors(
        &self,
        user_id: &str,
        affinity: &AffinityVector,
        k: usize,
    ) -> Vec<(f32, AffinityVector)> {
        if k == 0 || affinity.is_empty() {
            return Vec::new();
        }

        let slots: Vec<(String, Arc<UserSlot>)> = self
            .users
            .iter()
            .filter(|entry| entry.key() != user_id)
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut scored = Vec::with_capacity(slots.len());
        for (other_id, slot) in slots {
            let state = Arc::clone(&*slot.committed.read().await);
            let similarity = sparse_cosine(affinity, &state.profile.affinity);
            if similarity > 0.0 {
                scored.push((other_id, similarity, state.profile.affinity.clone()));
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        scored
            .into_iter()
            .take(k)
            .map(|(_, similarity, vector)| (similarity, vector))
            .collect()
    }

    /// Serialized profile + bandit arms of a user
    pub async fn export(&self, user_id: &str) -> Result<String> {
        let state = self
            .snapshot(user_id)
            .await
            .ok_or_else(|| DiscoveryError::NotFound(format!("No profile for user {}", user_id)))?;
        state.to_json()
    }

    /// Replace (or create) a user's state from its serialized form
    pub async fn import(&self, user_id: &str, json: &str) -> Result<()> {
        let state = UserState::from_json(json)?;
        if state.user_id() != user_id {
            return Err(DiscoveryError::Validation(format!(
                "State belongs to user {}, not {}",
                state.user_id(),
                user_id
            )));
        }

        self.register(user_id);
        self.update(user_id, move |current| *current = state)
            .await
            .ok_or_else(|| DiscoveryError::Internal(format!("User {} vanished", user_id)))?;

        info!(user_id = %user_id, "Imported user state");
        Ok(())
    }
}
