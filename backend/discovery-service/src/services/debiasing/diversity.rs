use super::{DebiasContext, DebiasStage};
use crate::config::EngineConfig;
use crate::models::Candidate;
use std::cmp::Ordering;

/// Diversity Promotion - 多樣性重排
/// 使用 MMR (Maximal Marginal Relevance) 算法
///
/// At each position pick the remaining candidate maximizing
///   debiased_score − weight · max_similarity(candidate, selected)
/// where similarity = 0.5 · shares_artist + 0.5 · genre_jaccard.
///
/// The selected MMR value becomes the candidate's `marginal_score`, which
/// later stages order by. Debiased scores are not touched.
pub struct DiversityPromotion {
    weight: f32,
    cold_start_weight: f32,
    max_consecutive_per_artist: usize, // 同一藝人最多連續出現次數, 0 = off
}

impl DiversityPromotion {
    pub fn new(weight: f32) -> Self {
        Self {
            weight: weight.clamp(0.0, 1.0),
            cold_start_weight: weight.clamp(0.0, 1.0),
            max_consecutive_per_artist: 2,
        }
    }

    /// Create with custom consecutive artist limit
    pub fn with_artist_limit(weight: f32, max_consecutive: usize) -> Self {
        Self {
            max_consecutive_per_artist: max_consecutive,
            ..Self::new(weight)
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            weight: config.diversity_weight.clamp(0.0, 1.0),
            cold_start_weight: config.cold_start_diversity_weight.clamp(0.0, 1.0),
            max_consecutive_per_artist: config.max_consecutive_per_artist,
        }
    }

    pub fn similarity(a: &Candidate, b: &Candidate) -> f32 {
        let artist = if a.track.shares_artist(&b.track) { 1.0 } else { 0.0 };
        0.5 * artist + 0.5 * a.track.genre_overlap(&b.track)
    }

    /// Check if appending this candidate would exceed the consecutive-artist cap
    fn violates_artist_limit(&self, selected: &[Candidate], candidate: &Candidate) -> bool {
        let limit = self.max_consecutive_per_artist;
        if limit == 0 || selected.len() < limit {
            return false;
        }
        selected
            .iter()
            .rev()
            .take(limit)
            .all(|prev| prev.track.shares_artist(&candidate.track))
    }

    /// Greedy MMR order over the whole list
    pub fn rerank(&self, candidates: Vec<Candidate>, weight: f32) -> Vec<Candidate> {
        let mut remaining = candidates;
        let mut selected: Vec<Candidate> = Vec::with_capacity(remaining.len());
        // Highest similarity of each remaining candidate to the selected set
        let mut max_sim: Vec<f32> = vec![0.0; remaining.len()];
        let mut last_marginal = f32::INFINITY;

        while !remaining.is_empty() {
            let mut best: Option<(usize, f32)> = None;
            let mut best_any: Option<(usize, f32)> = None;

            for (i, c) in remaining.iter().enumerate() {
                let mmr = c.debiased_score - weight * max_sim[i];
                if Self::better(c, mmr, best_any.map(|(j, m)| (&remaining[j], m))) {
                    best_any = Some((i, mmr));
                }
                // Hard constraint: skip if it would extend a same-artist run
                if self.violates_artist_limit(&selected, c) {
                    continue;
                }
                if Self::better(c, mmr, best.map(|(j, m)| (&remaining[j], m))) {
                    best = Some((i, mmr));
                }
            }

            // Every remaining candidate violates the cap: relax it
            let (idx, mmr) = match best.or(best_any) {
                Some(pick) => pick,
                None => break,
            };

            let mut chosen = remaining.remove(idx);
            max_sim.remove(idx);
            for (i, c) in remaining.iter().enumerate() {
                max_sim[i] = max_sim[i].max(Self::similarity(c, &chosen));
            }

            // Non-increasing so later stages keep this order
            last_marginal = last_marginal.min(mmr);
            chosen.marginal_score = Some(last_marginal);
            selected.push(chosen);
        }

        selected
    }

    /// Canonical preference: higher MMR, then higher score, then lower track id
    fn better(candidate: &Candidate, mmr: f32, current: Option<(&Candidate, f32)>) -> bool {
        match current {
            None => true,
            Some((other, other_mmr)) => mmr
                .partial_cmp(&other_mmr)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    candidate
                        .debiased_score
                        .partial_cmp(&other.debiased_score)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| other.track.id.cmp(&candidate.track.id))
                .is_gt(),
        }
    }
}

impl DebiasStage for DiversityPromotion {
    fn name(&self) -> &'static str {
        "diversity_promotion"
    }

    fn apply(&self, candidates: Vec<Candidate>, ctx: &DebiasContext) -> Vec<Candidate> {
        let weight = if ctx.cold_start {
            self.cold_start_weight
        } else {
            self.weight
        };
        self.rerank(candidates, weight)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{candidate, ids};
    use super::*;
    use std::collections::HashSet;

    fn ctx() -> DebiasContext {
        DebiasContext {
            target_size: 10,
            cold_start: false,
        }
    }

    #[test]
    fn test_diversity_rerank_interleaves_genres() {
        let layer = DiversityPromotion::new(0.5);
        let list = vec![
            candidate("r1", "a1", &["rock"], 50.0, 0.90),
            candidate("r2", "a2", &["rock"], 50.0, 0.88),
            candidate("r3", "a3", &["rock"], 50.0, 0.86),
            candidate("j1", "a4", &["jazz"], 50.0, 0.70),
        ];

        let out = layer.apply(list, &ctx());
        assert_eq!(out.len(), 4);
        // j1: 0.70 beats r2: 0.88 - 0.5 * 0.5
        assert_eq!(ids(&out[..2]), vec!["r1", "j1"]);
        let unique: HashSet<_> = out.iter().map(|c| c.track_id()).collect();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn test_zero_weight_keeps_score_order() {
        let layer = DiversityPromotion::with_artist_limit(0.0, 0);
        let list = vec![
            candidate("b", "a1", &["rock"], 50.0, 0.5),
            candidate("a", "a1", &["rock"], 50.0, 0.9),
            candidate("c", "a1", &["rock"], 50.0, 0.7),
        ];
        let out = layer.apply(list, &ctx());
        assert_eq!(ids(&out), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_rerank_is_idempotent() {
        let layer = DiversityPromotion::new(0.4);
        let mut list = Vec::new();
        for i in 0..12 {
            list.push(candidate(
                &format!("t{:02}", i),
                &format!("a{}", i % 3),
                &[["rock", "jazz", "pop", "folk"][i % 4]],
                50.0,
                1.0 - i as f32 * 0.05,
            ));
        }

        let once = layer.apply(list, &ctx());
        let twice = layer.apply(once.clone(), &ctx());
        assert_eq!(ids(&once), ids(&twice));
    }

    #[test]
    fn test_artist_diversity_enforcement() {
        let layer = DiversityPromotion::with_artist_limit(0.0, 2);
        let list = vec![
            candidate("t1", "a1", &["rock"], 50.0, 0.90),
            candidate("t2", "a1", &["rock"], 50.0, 0.88),
            candidate("t3", "a1", &["rock"], 50.0, 0.86),
            candidate("t4", "a2", &["rock"], 50.0, 0.70),
        ];

        let out = layer.apply(list, &ctx());
        assert_eq!(out.len(), 4);
        for window in out.windows(3) {
            let all_same = window.iter().all(|c| c.track.artist_ids == window[0].track.artist_ids);
            assert!(!all_same, "three consecutive tracks by one artist: {:?}", ids(window));
        }
    }

    #[test]
    fn test_marginal_scores_non_increasing() {
        let layer = DiversityPromotion::with_artist_limit(0.6, 1);
        let list = vec![
            candidate("t1", "a1", &["rock"], 50.0, 0.9),
            candidate("t2", "a1", &["rock"], 50.0, 0.85),
            candidate("t3", "a2", &["pop"], 50.0, 0.2),
        ];
        let out = layer.apply(list, &ctx());
        let marginals: Vec<f32> = out.iter().map(|c| c.marginal_score.unwrap()).collect();
        assert!(marginals.windows(2).all(|w| w[0] >= w[1]));
        // Scores themselves are untouched
        assert_eq!(out.iter().find(|c| c.track_id() == "t2").unwrap().debiased_score, 0.85);
    }
}
