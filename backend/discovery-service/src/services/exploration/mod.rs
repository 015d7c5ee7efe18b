// ============================================
// Exploration Module (探索模块)
// ============================================
//
// Explore-exploit balance at slot level:
// 1. Every output slot rolls against the user's exploration rate (epsilon)
// 2. Exploration slots pick an arm (niche / experimental) by bandit estimate
// 3. The arm's pool yields the next unused candidate in ranked order
// 4. Rewards from feedback update the arm that produced the track
//
// Arm pools:
// - Exploit: the debiased ranked list
// - Explore-Niche: candidates by artists the user has never interacted with
// - Explore-Experimental: candidates whose combined score sits below the
//   median of the user's historical scores

pub mod bandit;
pub mod selector;

pub use bandit::{ArmSet, BanditArm};
pub use selector::{Selection, SelectionRequest, SlotSelector};
