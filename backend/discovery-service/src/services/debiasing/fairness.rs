use super::{DebiasContext, DebiasStage};
use crate::config::EngineConfig;
use crate::models::{sort_ranked, ArmKind, Candidate};
use tracing::debug;

/// Fairness constraint
///
/// At least `ceil(floor · N)` of the top N must be underrepresented
/// (popularity below the threshold). Missing slots are filled by swapping
/// the best underrepresented candidates outside the top N into the places
/// of the lowest-scoring represented ones, until the floor holds or the
/// underrepresented pool runs out.
#[derive(Debug, Clone, Copy)]
pub struct FairnessConstraint {
    floor: f32,
    popularity_threshold: f32,
}

impl FairnessConstraint {
    pub fn new(floor: f32, popularity_threshold: f32) -> Self {
        Self {
            floor: floor.clamp(0.0, 1.0),
            popularity_threshold,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.fairness_floor, config.underrepresented_popularity_threshold)
    }

    pub fn is_underrepresented(&self, candidate: &Candidate) -> bool {
        candidate.track.popularity < self.popularity_threshold
    }

    /// Underrepresented slots required in a list of `n`
    pub fn required(&self, n: usize) -> usize {
        ((self.floor * n as f32) - 1e-4).ceil().max(0.0) as usize
    }

    pub fn mark(&self, candidates: &mut [Candidate]) {
        for c in candidates.iter_mut() {
            c.underrepresented = self.is_underrepresented(c);
        }
    }

    /// Swap underrepresented candidates from `pool` into `selected` until the
    /// floor holds. Swapped-out candidates go back into `pool`, which stays in
    /// ranked order. `relabel` picks the incoming candidate's provenance from
    /// the slot's arm. Returns the number of swaps.
    pub fn enforce<F>(&self, selected: &mut [Candidate], pool: &mut Vec<Candidate>, relabel: F) -> usize
    where
        F: Fn(&Candidate, Option<ArmKind>) -> Option<ArmKind>,
    {
        let required = self.required(selected.len());
        let mut present = selected.iter().filter(|c| c.underrepresented).count();
        let mut swaps = 0;

        while present < required {
            let incoming_idx = match pool.iter().position(|c| c.underrepresented) {
                Some(idx) => idx,
                None => break,
            };
            // Lowest-scoring represented candidate; ties go to the later slot
            let outgoing_idx = match selected
                .iter()
                .enumerate()
                .filter(|(_, c)| !c.underrepresented)
                .min_by(|(i, a), (j, b)| {
                    a.debiased_score
                        .partial_cmp(&b.debiased_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| j.cmp(i))
                })
                .map(|(i, _)| i)
            {
                Some(idx) => idx,
                None => break,
            };

            let mut incoming = pool.remove(incoming_idx);
            incoming.provenance = relabel(&incoming, selected[outgoing_idx].provenance);
            let outgoing = std::mem::replace(&mut selected[outgoing_idx], incoming);
            debug!(
                incoming = %selected[outgoing_idx].track_id(),
                outgoing = %outgoing.track_id(),
                "Fairness swap"
            );
            pool.push(outgoing);
            present += 1;
            swaps += 1;
        }

        if swaps > 0 {
            sort_ranked(pool);
        }
        swaps
    }
}

impl DebiasStage for FairnessConstraint {
    fn name(&self) -> &'static str {
        "fairness_constraint"
    }

    fn apply(&self, mut candidates: Vec<Candidate>, ctx: &DebiasContext) -> Vec<Candidate> {
        self.mark(&mut candidates);
        let n = ctx.target_size.min(candidates.len());
        let mut rest = candidates.split_off(n);
        self.enforce(&mut candidates, &mut rest, |_, _| None);
        candidates.extend(rest);
        candidates
    }
}
