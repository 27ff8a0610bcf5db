//! Deterministic corrupted-subset selection for experiments.
//!
//! Every relay runs the same seeded draw at run start, so the corrupted
//! subset is reproducible across the whole network without coordination.
//! Production deployments set `chi = 0`, which disables the mechanism.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;

/// Fixed seed shared by every relay; the experiment harness depends on the
/// draw being identical everywhere.
pub const CORRUPTION_SEED: u64 = 42;

/// The corrupted subset of relay ids `1..=num_relays`:
/// `floor(chi * num_relays)` of them, chosen by a seeded shuffle.
pub fn corrupted_relay_ids(num_relays: usize, chi: f64, seed: u64) -> HashSet<u32> {
    let count = (chi.clamp(0.0, 1.0) * num_relays as f64).floor() as usize;
    let mut ids: Vec<u32> = (1..=num_relays as u32).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    ids.shuffle(&mut rng);
    ids.into_iter().take(count).collect()
}
