//! Region-local data through real merges and splits.

use std::sync::Arc;

use tessera_core::{FatalPolicy, RegionId};
use tessera_region::{Region, Regionizer, RegionizerConfig};
use tessera_test_utils::{Counter, Deadlines, Fixtures, SectionCounter};

fn regionizer(fx: &Fixtures) -> Regionizer {
    let config = RegionizerConfig {
        max_dead_section_percent: 0.1,
        fatal_policy: FatalPolicy::Poison,
        ..Default::default()
    };
    Regionizer::new(config, Arc::clone(&fx.registry)).unwrap()
}

fn run_ticks(r: &Regionizer, region: &Arc<Region>, n: u64) {
    for _ in 0..n {
        assert!(region.try_begin_tick());
        region.advance_tick();
        r.release_region(region).unwrap();
    }
}

#[test]
fn merge_sums_counters() {
    let fx = Fixtures::new();
    let r = regionizer(&fx);
    r.add_cell(0, 0).unwrap();
    r.add_cell(64, 0).unwrap();
    r.region_at(0, 0)
        .unwrap()
        .with_data(|d| d.get_or_create(&fx.counter).0 = 11);
    r.region_at(64, 0)
        .unwrap()
        .with_data(|d| d.get_or_create(&fx.counter).0 = 31);

    r.add_cell(32, 0).unwrap();

    let merged = r.region_at(32, 0).unwrap();
    assert_eq!(merged.id(), RegionId(1));
    assert_eq!(merged.with_data(|d| d.get(&fx.counter).cloned()), Some(Counter(42)));
}

#[test]
fn merge_rebases_deadlines_into_survivor_time_base() {
    let fx = Fixtures::new();
    let r = regionizer(&fx);
    r.add_cell(0, 0).unwrap();
    r.add_cell(64, 0).unwrap();
    let into = r.region_at(0, 0).unwrap();
    let from = r.region_at(64, 0).unwrap();
    run_ticks(&r, &into, 40);
    run_ticks(&r, &from, 100);
    from.with_data(|d| d.get_or_create(&fx.deadlines).0.push(150));
    into.with_data(|d| d.get_or_create(&fx.deadlines).0.push(45));

    r.add_cell(32, 0).unwrap();

    let deadlines = into.with_data(|d| d.get(&fx.deadlines).cloned());
    assert_eq!(deadlines, Some(Deadlines(vec![45, 90])));
}

#[test]
fn split_conserves_section_counts() {
    let fx = Fixtures::new();
    let r = regionizer(&fx);
    let shift = r.section_shift();
    for (x, z) in [(0, 0), (5, 5), (64, 0), (70, 3), (32, 0)] {
        r.add_cell(x, z).unwrap();
    }
    assert_eq!(r.region_count(), 1);
    r.region_at(0, 0).unwrap().with_data(|d| {
        let c = d.get_or_create(&fx.sections);
        c.add_at(0, 0, shift, 3);
        c.add_at(5, 5, shift, 4);
        c.add_at(64, 0, shift, 10);
        c.add_at(70, 3, shift, 20);
    });

    r.remove_cell(32, 0).unwrap();
    assert_eq!(r.region_count(), 2);

    let left = r.region_at(0, 0).unwrap();
    let right = r.region_at(64, 0).unwrap();
    let left_total = left.with_data(|d| d.get(&fx.sections).map(SectionCounter::total));
    let right_total = right.with_data(|d| d.get(&fx.sections).map(SectionCounter::total));
    assert_eq!(left_total, Some(7));
    assert_eq!(right_total, Some(30));
}

#[test]
fn split_children_inherit_tick_and_kinds_only_when_present() {
    let fx = Fixtures::new();
    let r = regionizer(&fx);
    for (x, z) in [(0, 0), (64, 0), (32, 0)] {
        r.add_cell(x, z).unwrap();
    }
    let parent = r.region_at(0, 0).unwrap();
    run_ticks(&r, &parent, 12);
    parent.with_data(|d| d.get_or_create(&fx.counter).0 = 5);

    r.remove_cell(32, 0).unwrap();

    let children: Vec<_> = r.regions();
    assert_eq!(children.len(), 2);
    let mut total = 0;
    for child in &children {
        assert_eq!(child.tick(), 12);
        child.with_data(|d| {
            assert!(d.get(&fx.deadlines).is_none());
            total += d.get(&fx.counter).map(|c| c.0).unwrap_or(0);
        });
    }
    assert_eq!(total, 5);
}

#[test]
fn dead_percent_is_zero_after_full_compaction() {
    let fx = Fixtures::new();
    let r = regionizer(&fx);
    for x in 0..6 {
        r.add_cell(x * 16, 0).unwrap();
    }
    let region = r.region_at(0, 0).unwrap();
    for x in 1..6 {
        r.remove_cell(x * 16, 0).unwrap();
        for live in r.regions() {
            let p = live.dead_section_percent();
            assert!((0.0..=1.0).contains(&p), "dead percent {p} out of range");
        }
        if x == 3 {
            // Column 2 went dead and was pruned, splitting the region in two.
            assert!(region.is_dead());
            assert_eq!(r.region_count(), 2);
            for child in r.regions() {
                assert_eq!(child.dead_section_count(), 0);
                assert_eq!(child.dead_section_percent(), 0.0);
            }
        }
    }
    assert_eq!(r.region_count(), 1);
    let survivor = r.region_at(0, 0).unwrap();
    assert!(survivor.id() > region.id(), "survivor must be a split child");
    assert_eq!(survivor.tick(), region.tick());
    assert_eq!(survivor.dead_section_count(), 0);
    assert_eq!(survivor.dead_section_percent(), 0.0);
    assert_eq!(survivor.section_count(), 9);
}
