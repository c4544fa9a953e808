//! Randomized add/remove sequences against the regionizer's partition
//! invariants: cell conservation, partition exclusivity, and maximality
//! (no two regions within merge radius of each other).

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;
use tessera_core::{CellPos, FatalPolicy, RegionizerError};
use tessera_region::{Regionizer, RegionizerConfig};
use tessera_test_utils::Fixtures;

#[derive(Clone, Debug)]
enum Op {
    Add(i32, i32),
    Remove(i32, i32),
}

fn op() -> impl Strategy<Value = Op> {
    // An 8-cell lattice: two cells per section axis at the default shift,
    // so adds and removes collide often.
    let coord = (-6i32..6).prop_map(|i| i * 8);
    prop_oneof![
        3 => (coord.clone(), coord.clone()).prop_map(|(x, z)| Op::Add(x, z)),
        2 => (coord.clone(), coord).prop_map(|(x, z)| Op::Remove(x, z)),
    ]
}

fn config(max_dead: f64) -> RegionizerConfig {
    RegionizerConfig {
        max_dead_section_percent: max_dead,
        fatal_policy: FatalPolicy::Poison,
        ..Default::default()
    }
}

fn check_invariants(r: &Regionizer, model: &HashMap<(i32, i32), u32>) -> Result<(), TestCaseError> {
    let regions = r.regions();

    // Conservation.
    let summed: u64 = regions.iter().map(|g| g.cell_count()).sum();
    prop_assert_eq!(summed as usize, model.len());
    prop_assert_eq!(r.cell_count(), model.len());

    // Exclusivity.
    let mut owners: HashMap<CellPos, usize> = HashMap::new();
    for region in &regions {
        prop_assert!(!region.is_dead());
        let p = region.dead_section_percent();
        prop_assert!((0.0..=1.0).contains(&p));
        for cell in r.owned_cells(region.id()) {
            *owners.entry(cell).or_insert(0) += 1;
        }
    }
    prop_assert_eq!(owners.len(), model.len());
    for &(x, z) in model.keys() {
        prop_assert_eq!(owners.get(&CellPos::new(x, z)).copied(), Some(1));
        let sync = r.region_at(x, z).map(|g| g.id());
        let unsync = r.region_at_unsynchronized(x, z).map(|g| g.id());
        prop_assert!(sync.is_some());
        prop_assert_eq!(sync, unsync);
    }

    // Maximality: sections of distinct regions are never adjacent.
    let radius = r.config().merge_radius as u32;
    let sections: Vec<_> = regions.iter().map(|g| r.owned_sections(g.id())).collect();
    for i in 0..sections.len() {
        for j in (i + 1)..sections.len() {
            for a in &sections[i] {
                for b in &sections[j] {
                    prop_assert!(
                        a.chebyshev(*b) > radius,
                        "regions {} and {} are adjacent at {} / {}",
                        regions[i].id(),
                        regions[j].id(),
                        a,
                        b
                    );
                }
            }
        }
    }
    Ok(())
}

fn run(ops: &[Op], max_dead: f64) -> Result<(), TestCaseError> {
    let fx = Fixtures::new();
    let r = Regionizer::new(config(max_dead), Arc::clone(&fx.registry)).unwrap();
    let mut model: HashMap<(i32, i32), u32> = HashMap::new();

    for op in ops {
        match *op {
            Op::Add(x, z) => {
                r.add_cell(x, z).unwrap();
                *model.entry((x, z)).or_insert(0) += 1;
            }
            Op::Remove(x, z) => match model.get_mut(&(x, z)) {
                Some(count) => {
                    r.remove_cell(x, z).unwrap();
                    *count -= 1;
                    if *count == 0 {
                        model.remove(&(x, z));
                    }
                }
                None => match r.remove_cell(x, z) {
                    Err(RegionizerError::CellNotPresent { .. }) => {}
                    other => {
                        return Err(TestCaseError::fail(format!(
                            "expected CellNotPresent, got {other:?}"
                        )))
                    }
                },
            },
        }
        check_invariants(&r, &model)?;
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn partition_invariants_hold(ops in prop::collection::vec(op(), 1..80)) {
        run(&ops, 0.20)?;
    }

    #[test]
    fn partition_invariants_hold_with_eager_compaction(ops in prop::collection::vec(op(), 1..80)) {
        run(&ops, 0.01)?;
    }
}
