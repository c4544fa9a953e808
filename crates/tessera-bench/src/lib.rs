//! Benchmark workloads for the Tessera regionizer and scheduler.
//!
//! - [`churn_ops`]: a seeded add/remove sequence over a square of cells
//! - [`apply`]: replay such a sequence against a regionizer
//! - [`bench_regionizer_config`]: the configuration the benches run with

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::collections::HashMap;

use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tessera_core::{FatalPolicy, RegionizerError};
use tessera_region::{Regionizer, RegionizerConfig};

/// One cell mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChurnOp {
    /// Add a reference to a cell.
    Add(i32, i32),
    /// Drop a reference to a cell.
    Remove(i32, i32),
}

/// Regionizer configuration used by the benches: defaults, but poisoning
/// instead of aborting.
pub fn bench_regionizer_config() -> RegionizerConfig {
    RegionizerConfig {
        fatal_policy: FatalPolicy::Poison,
        ..Default::default()
    }
}

/// `n` seeded operations over the cells of a `side × side` square.
///
/// Removals only target cells the sequence has added and not yet removed,
/// so replaying it never fails. Roughly one op in three is a removal.
pub fn churn_ops(n: usize, side: u32, seed: u64) -> Vec<ChurnOp> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut live: Vec<(i32, i32)> = Vec::new();
    let mut ops = Vec::with_capacity(n);
    let side = side.max(1);
    for _ in 0..n {
        let roll = rng.next_u32();
        if !live.is_empty() && roll % 3 == 0 {
            let idx = (rng.next_u32() as usize) % live.len();
            let (x, z) = live.swap_remove(idx);
            ops.push(ChurnOp::Remove(x, z));
        } else {
            let x = (rng.next_u32() % side) as i32;
            let z = (rng.next_u32() % side) as i32;
            live.push((x, z));
            ops.push(ChurnOp::Add(x, z));
        }
    }
    ops
}

/// Apply `ops` to `regionizer` in order.
pub fn apply(regionizer: &Regionizer, ops: &[ChurnOp]) -> Result<(), RegionizerError> {
    for op in ops {
        match *op {
            ChurnOp::Add(x, z) => regionizer.add_cell(x, z)?,
            ChurnOp::Remove(x, z) => regionizer.remove_cell(x, z)?,
        }
    }
    Ok(())
}

/// Net reference count per cell after `ops`.
pub fn net_cells(ops: &[ChurnOp]) -> HashMap<(i32, i32), u32> {
    let mut counts: HashMap<(i32, i32), u32> = HashMap::new();
    for op in ops {
        match *op {
            ChurnOp::Add(x, z) => *counts.entry((x, z)).or_insert(0) += 1,
            ChurnOp::Remove(x, z) => {
                if let Some(c) = counts.get_mut(&(x, z)) {
                    *c -= 1;
                    if *c == 0 {
                        counts.remove(&(x, z));
                    }
                }
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_region::DataRegistry;

    #[test]
    fn churn_is_deterministic() {
        assert_eq!(churn_ops(500, 64, 7), churn_ops(500, 64, 7));
        assert_ne!(churn_ops(500, 64, 7), churn_ops(500, 64, 8));
    }

    #[test]
    fn churn_replays_cleanly_and_conserves_cells() {
        let ops = churn_ops(2_000, 256, 42);
        let r = Regionizer::new(bench_regionizer_config(), DataRegistry::empty()).unwrap();
        apply(&r, &ops).unwrap();
        assert_eq!(r.cell_count(), net_cells(&ops).len());
        let summed: u64 = r.regions().iter().map(|g| g.cell_count()).sum();
        assert_eq!(summed as usize, r.cell_count());
    }
}
