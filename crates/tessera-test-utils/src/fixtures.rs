//! Reusable region-local data fixtures.
//!
//! - [`Counter`]: a single summing value. Merge adds; split hands the
//!   whole value to the first child.
//! - [`SectionCounter`]: amounts keyed by section. Merge adds per key;
//!   split routes each key to the child that owns the section.
//! - [`Deadlines`]: absolute tick deadlines, rebased by the merge offset.

use std::collections::HashMap;
use std::sync::Arc;

use tessera_core::coord::section_key_of;
use tessera_core::RegionId;
use tessera_region::{DataKind, DataRegistry, RegionLocal, SplitTargets};

/// A summing counter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Counter(pub i64);

impl RegionLocal for Counter {
    fn create(_region: RegionId) -> Self {
        Counter(0)
    }

    fn merge(self, into: &mut Self, _tick_offset: i64) {
        into.0 += self.0;
    }

    fn split(self, _shift: u32, targets: &mut SplitTargets<'_, Self>) {
        if let Some(first) = targets.get_mut(0) {
            first.0 += self.0;
        }
    }
}

/// Amounts recorded against the section of a cell.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SectionCounter {
    pub per_section: HashMap<u64, i64>,
}

impl SectionCounter {
    /// Record `amount` against the section holding `(x, z)`.
    pub fn add_at(&mut self, x: i32, z: i32, shift: u32, amount: i64) {
        *self.per_section.entry(section_key_of(x, z, shift)).or_insert(0) += amount;
    }

    /// Sum over all sections.
    pub fn total(&self) -> i64 {
        self.per_section.values().sum()
    }
}

impl RegionLocal for SectionCounter {
    fn create(_region: RegionId) -> Self {
        Self::default()
    }

    fn merge(self, into: &mut Self, _tick_offset: i64) {
        for (k, v) in self.per_section {
            *into.per_section.entry(k).or_insert(0) += v;
        }
    }

    fn split(self, _shift: u32, targets: &mut SplitTargets<'_, Self>) {
        for (k, v) in self.per_section {
            // Sections pruned by compaction fall back to the first child.
            let target = match targets.index_of_section(k) {
                Some(idx) => targets.get_mut(idx),
                None => targets.get_mut(0),
            };
            if let Some(t) = target {
                *t.per_section.entry(k).or_insert(0) += v;
            }
        }
    }
}

/// Absolute tick deadlines.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Deadlines(pub Vec<i64>);

impl RegionLocal for Deadlines {
    fn create(_region: RegionId) -> Self {
        Self::default()
    }

    fn merge(self, into: &mut Self, tick_offset: i64) {
        into.0.extend(self.0.into_iter().map(|d| d + tick_offset));
    }

    fn split(self, _shift: u32, targets: &mut SplitTargets<'_, Self>) {
        for t in targets.iter_mut() {
            t.0.extend_from_slice(&self.0);
        }
    }
}

/// A registry holding every fixture kind.
pub struct Fixtures {
    pub registry: Arc<DataRegistry>,
    pub counter: DataKind<Counter>,
    pub sections: DataKind<SectionCounter>,
    pub deadlines: DataKind<Deadlines>,
}

impl Fixtures {
    pub fn new() -> Self {
        let mut b = DataRegistry::builder();
        let counter = b.register::<Counter>("counter");
        let sections = b.register::<SectionCounter>("section-counter");
        let deadlines = b.register::<Deadlines>("deadlines");
        Self {
            registry: b.build(),
            counter,
            sections,
            deadlines,
        }
    }
}

impl Default for Fixtures {
    fn default() -> Self {
        Self::new()
    }
}
