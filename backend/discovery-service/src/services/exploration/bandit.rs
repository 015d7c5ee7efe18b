// ============================================
// Bandit Arms
// ============================================
//
// One arm per recommendation channel (Exploit / Explore-Niche /
// Explore-Experimental). Rewards are feedback magnitudes in [-1, 1];
// each arm keeps a plain running average so it reacts with full weight
// to the latest signal.
//
// Thompson Sampling maps rewards to [0, 1] successes:
//   success = (reward + 1) / 2
//   Beta(alpha, beta) with alpha = 1 + successes, beta = 1 + pulls - successes

use crate::models::ArmKind;
use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditArm {
    pub kind: ArmKind,
    /// Feedback events attributed to this arm
    pub pulls: u64,
    /// Sum of rewards in [-1, 1]
    pub cumulative_reward: f64,
}

impl BanditArm {
    pub fn new(kind: ArmKind) -> Self {
        Self {
            kind,
            pulls: 0,
            cumulative_reward: 0.0,
        }
    }

    pub fn record(&mut self, reward: f32) {
        self.pulls += 1;
        self.cumulative_reward += reward.clamp(-1.0, 1.0) as f64;
    }

    /// Running average reward; None before the first pull
    pub fn mean_reward(&self) -> Option<f64> {
        if self.pulls == 0 {
            None
        } else {
            Some(self.cumulative_reward / self.pulls as f64)
        }
    }

    /// Mean reward mapped to [0, 1]; 0.5 prior before the first pull
    pub fn estimated_success(&self) -> f64 {
        self.mean_reward()
            .map(|mean| ((mean + 1.0) / 2.0).clamp(0.0, 1.0))
            .unwrap_or(0.5)
    }

    pub fn beta_parameters(&self) -> (f64, f64) {
        let successes = ((self.cumulative_reward + self.pulls as f64) / 2.0).max(0.0);
        let failures = (self.pulls as f64 - successes).max(0.0);
        (1.0 + successes, 1.0 + failures)
    }

    /// Draw from the arm's Beta posterior
    pub fn thompson_sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let (alpha, beta) = self.beta_parameters();
        match Beta::new(alpha, beta) {
            Ok(dist) => dist.sample(rng),
            Err(_) => self.estimated_success(),
        }
    }
}

/// The three arms of one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSet {
    pub exploit: BanditArm,
    pub explore_niche: BanditArm,
    pub explore_experimental: BanditArm,
}

impl Default for ArmSet {
    fn default() -> Self {
        Self {
            exploit: BanditArm::new(ArmKind::Exploit),
            explore_niche: BanditArm::new(ArmKind::ExploreNiche),
            explore_experimental: BanditArm::new(ArmKind::ExploreExperimental),
        }
    }
}

impl ArmSet {
    pub fn get(&self, kind: ArmKind) -> &BanditArm {
        match kind {
            ArmKind::Exploit => &self.exploit,
            ArmKind::ExploreNiche => &self.explore_niche,
            ArmKind::ExploreExperimental => &self.explore_experimental,
        }
    }

    pub fn get_mut(&mut self, kind: ArmKind) -> &mut BanditArm {
        match kind {
            ArmKind::Exploit => &mut self.exploit,
            ArmKind::ExploreNiche => &mut self.explore_niche,
            ArmKind::ExploreExperimental => &mut self.explore_experimental,
        }
    }

    pub fn total_pulls(&self) -> u64 {
        ArmKind::ALL.iter().map(|kind| self.get(*kind).pulls).sum()
    }
}
