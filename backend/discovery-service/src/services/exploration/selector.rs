// ============================================
// Slot Selector
// ============================================
//
// Decides provenance slot by slot for one request:
//   r ~ U(0, 1)
//   r <  epsilon -> explore arm (weighted by estimate, or Thompson draw)
//   r >= epsilon -> Exploit
//
// Each arm draws the next unused candidate from its pool in ranked order.
// An exhausted explore pool falls back to Exploit; once Exploit is also
// exhausted the selection ends short instead of repeating tracks.

use super::ArmSet;
use crate::config::SelectionPolicy;
use crate::models::{ArmKind, Candidate};
use crate::services::context::ContextAdjustment;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use tracing::debug;

/// Inputs of one selection pass
pub struct SelectionRequest<'a> {
    /// Debiased ranked list
    pub ranked: &'a [Candidate],
    pub count: usize,
    pub exploration_rate: f32,
    pub arms: &'a ArmSet,
    pub adjustment: &'a ContextAdjustment,
    /// Candidates with combined score below this form the experimental pool
    pub experimental_threshold: f32,
    /// Forces a single arm with no fallback
    pub category: Option<ArmKind>,
    /// Skip exploration entirely (cold start)
    pub exploit_only: bool,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct Selection {
    /// Chosen candidates in slot order, provenance set
    pub items: Vec<Candidate>,
    /// Unchosen candidates in ranked order
    pub remaining: Vec<Candidate>,
    /// Slots left unfilled because every usable pool ran dry
    pub exhausted: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SlotSelector {
    policy: SelectionPolicy,
}

impl SlotSelector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self { policy }
    }

    pub fn select(&self, request: &SelectionRequest<'_>) -> Selection {
        let mut rng = StdRng::seed_from_u64(request.seed);
        let mut taken: HashSet<usize> = HashSet::new();
        let mut items = Vec::with_capacity(request.count);
        let mut exhausted = false;

        for slot in 0..request.count {
            let arm = match request.category {
                Some(forced) => forced,
                None if request.exploit_only => ArmKind::Exploit,
                None => self.choose_arm(&mut rng, request),
            };

            let mut pick = Self::draw(arm, request, &taken).map(|idx| (arm, idx));
            if pick.is_none() && request.category.is_none() && arm != ArmKind::Exploit {
                debug!(slot = slot, arm = arm.as_str(), "Arm pool exhausted, falling back to exploit");
                pick = Self::draw(ArmKind::Exploit, request, &taken).map(|idx| (ArmKind::Exploit, idx));
            }

            match pick {
                Some((arm, idx)) => {
                    taken.insert(idx);
                    let mut candidate = request.ranked[idx].clone();
                    candidate.provenance = Some(arm);
                    debug!(
                        slot = slot,
                        arm = arm.as_str(),
                        track_id = %candidate.track_id(),
                        "Slot filled"
                    );
                    items.push(candidate);
                }
                None => {
                    exhausted = true;
                    break;
                }
            }
        }

        let remaining = request
            .ranked
            .iter()
            .enumerate()
            .filter(|(idx, _)| !taken.contains(idx))
            .map(|(_, c)| c.clone())
            .collect();

        Selection {
            items,
            remaining,
            exhausted,
        }
    }

    fn choose_arm(&self, rng: &mut StdRng, request: &SelectionRequest<'_>) -> ArmKind {
        let roll: f32 = rng.gen();
        if roll >= request.exploration_rate {
            return ArmKind::Exploit;
        }

        let weights: Vec<(ArmKind, f64)> = ArmKind::EXPLORE
            .iter()
            .map(|&arm| {
                let estimate = match self.policy {
                    SelectionPolicy::EpsilonGreedy => request.arms.get(arm).estimated_success(),
                    SelectionPolicy::ThompsonSampling => request.arms.get(arm).thompson_sample(rng),
                };
                (arm, estimate * request.adjustment.arm_multiplier(arm).max(0.0) as f64)
            })
            .collect();

        match self.policy {
            SelectionPolicy::EpsilonGreedy => {
                let total: f64 = weights.iter().map(|(_, w)| w).sum();
                if total <= 0.0 {
                    return ArmKind::Exploit;
                }
                let mut target = rng.gen::<f64>() * total;
                for (arm, weight) in &weights {
                    if target < *weight {
                        return *arm;
                    }
                    target -= weight;
                }
                weights
                    .iter()
                    .rev()
                    .find(|(_, w)| *w > 0.0)
                    .map(|(arm, _)| *arm)
                    .unwrap_or(ArmKind::Exploit)
            }
            SelectionPolicy::ThompsonSampling => weights
                .iter()
                .filter(|(_, w)| *w > 0.0)
                .fold(None::<(ArmKind, f64)>, |best, &(arm, w)| match best {
                    Some((_, best_w)) if best_w >= w => best,
                    _ => Some((arm, w)),
                })
                .map(|(arm, _)| arm)
                .unwrap_or(ArmKind::Exploit),
        }
    }

    /// Whether a candidate belongs to the arm's pool
    pub fn eligible(arm: ArmKind, candidate: &Candidate, experimental_threshold: f32) -> bool {
        match arm {
            ArmKind::Exploit => true,
            ArmKind::ExploreNiche => candidate.new_artist,
            ArmKind::ExploreExperimental => candidate.combined_score < experimental_threshold,
        }
    }

    /// Index of the first unused candidate in the arm's pool
    fn draw(arm: ArmKind, request: &SelectionRequest<'_>, taken: &HashSet<usize>) -> Option<usize> {
        request
            .ranked
            .iter()
            .enumerate()
            .filter(|(idx, _)| !taken.contains(idx))
            .find(|(_, candidate)| Self::eligible(arm, candidate, request.experimental_threshold))
            .map(|(idx, _)| idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ScoreBreakdown, Track, AUDIO_DIM};
    use chrono::Utc;
    use std::sync::Arc;

    fn candidate(id: usize, combined: f32, new_artist: bool) -> Candidate {
        let track = Track {
            id: format!("t{:02}", id),
            artist_ids: vec![format!("a{}", id)],
            genres: Default::default(),
            audio: [0.5; AUDIO_DIM],
            popularity: 50.0,
            released_at: Utc::now(),
        };
        let mut c = Candidate::new(Arc::new(track), ScoreBreakdown::default(), combined);
        c.new_artist = new_artist;
        c
    }

    fn pool(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| candidate(i, 1.0 - i as f32 / n as f32, i % 2 == 1))
            .collect()
    }

    fn request<'a>(
        ranked: &'a [Candidate],
        count: usize,
        epsilon: f32,
        arms: &'a ArmSet,
        adjustment: &'a ContextAdjustment,
        seed: u64,
    ) -> SelectionRequest<'a> {
        SelectionRequest {
            ranked,
            count,
            exploration_rate: epsilon,
            arms,
            adjustment,
            experimental_threshold: 0.5,
            category: None,
            exploit_only: false,
            seed,
        }
    }

    #[test]
    fn test_zero_epsilon_is_pure_exploit_in_rank_order() {
        let ranked = pool(20);
        let arms = ArmSet::default();
        let adj = ContextAdjustment::default();
        let selection = SlotSelector::new(SelectionPolicy::EpsilonGreedy).select(&request(&ranked, 5, 0.0, &arms, &adj, 1));

        let ids: Vec<&str> = selection.items.iter().map(|c| c.track_id()).collect();
        assert_eq!(ids, vec!["t00", "t01", "t02", "t03", "t04"]);
        assert!(selection.items.iter().all(|c| c.provenance == Some(ArmKind::Exploit)));
        assert_eq!(selection.remaining.len(), 15);
        assert!(!selection.exhausted);
    }

    #[test]
    fn test_exploration_share_tracks_epsilon() {
        let ranked = pool(50);
        let arms = ArmSet::default();
        let adj = ContextAdjustment::default();
        let selector = SlotSelector::new(SelectionPolicy::EpsilonGreedy);

        let runs = 300;
        let explored: usize = (0..runs)
            .map(|seed| {
                let selection = selector.select(&request(&ranked, 10, 0.3, &arms, &adj, seed));
                selection
                    .items
                    .iter()
                    .filter(|c| c.provenance.map(|p| p.is_exploration()).unwrap_or(false))
                    .count()
            })
            .sum();

        let mean = explored as f64 / runs as f64;
        assert!(mean > 2.5 && mean < 3.5, "mean explore slots {}", mean);
    }

    #[test]
    fn test_never_duplicates_and_returns_short_list_when_exhausted() {
        let ranked = pool(4);
        let arms = ArmSet::default();
        let adj = ContextAdjustment::default();
        let selection = SlotSelector::new(SelectionPolicy::EpsilonGreedy).select(&request(&ranked, 10, 0.5, &arms, &adj, 9));

        assert_eq!(selection.items.len(), 4);
        assert!(selection.exhausted);
        let unique: HashSet<&str> = selection.items.iter().map(|c| c.track_id()).collect();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn test_category_filter_forces_single_arm() {
        let ranked = pool(10);
        let arms = ArmSet::default();
        let adj = ContextAdjustment::default();
        let mut req = request(&ranked, 10, 0.3, &arms, &adj, 3);
        req.category = Some(ArmKind::ExploreNiche);

        let selection = SlotSelector::new(SelectionPolicy::EpsilonGreedy).select(&req);
        assert_eq!(selection.items.len(), 5);
        assert!(selection.exhausted);
        assert!(selection.items.iter().all(|c| c.new_artist));
        assert!(selection.items.iter().all(|c| c.provenance == Some(ArmKind::ExploreNiche)));
    }

    #[test]
    fn test_suppressed_experimental_arm_is_never_chosen() {
        let ranked = pool(40);
        let arms = ArmSet::default();
        let adj = ContextAdjustment {
            experimental_multiplier: 0.0,
            ..Default::default()
        };

        for policy in [SelectionPolicy::EpsilonGreedy, SelectionPolicy::ThompsonSampling] {
            let selector = SlotSelector::new(policy);
            for seed in 0..50 {
                let selection = selector.select(&request(&ranked, 10, 0.9, &arms, &adj, seed));
                assert!(selection
                    .items
                    .iter()
                    .all(|c| c.provenance != Some(ArmKind::ExploreExperimental)));
            }
        }
    }

    #[test]
    fn test_exhausted_explore_pool_falls_back_to_exploit() {
        // No new-artist candidates and nothing below the threshold
        let ranked: Vec<Candidate> = (0..10).map(|i| candidate(i, 0.9, false)).collect();
        let arms = ArmSet::default();
        let adj = ContextAdjustment::default();
        let selection = SlotSelector::new(SelectionPolicy::EpsilonGreedy).select(&request(&ranked, 6, 1.0, &arms, &adj, 5));

        assert_eq!(selection.items.len(), 6);
        assert!(selection.items.iter().all(|c| c.provenance == Some(ArmKind::Exploit)));
    }

    #[test]
    fn test_same_seed_same_selection() {
        let ranked = pool(30);
        let arms = ArmSet::default();
        let adj = ContextAdjustment::default();
        let selector = SlotSelector::new(SelectionPolicy::ThompsonSampling);

        let a = selector.select(&request(&ranked, 10, 0.4, &arms, &adj, 42));
        let b = selector.select(&request(&ranked, 10, 0.4, &arms, &adj, 42));
        let ids_a: Vec<_> = a.items.iter().map(|c| (c.track_id().to_string(), c.provenance)).collect();
        let ids_b: Vec<_> = b.items.iter().map(|c| (c.track_id().to_string(), c.provenance)).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_exploit_only_ignores_epsilon() {
        let ranked = pool(20);
        let arms = ArmSet::default();
        let adj = ContextAdjustment::default();
        let mut req = request(&ranked, 8, 1.0, &arms, &adj, 11);
        req.exploit_only = true;

        let selection = SlotSelector::new(SelectionPolicy::EpsilonGreedy).select(&req);
        assert!(selection.items.iter().all(|c| c.provenance == Some(ArmKind::Exploit)));
    }
}
