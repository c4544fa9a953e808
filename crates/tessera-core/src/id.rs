//! Strongly-typed identifiers.

use std::fmt;

/// Identifies a region within one world's regionizer.
///
/// Allocated monotonically by the regionizer; ids are never reused
/// within a world, so a lower id always means an older region. Merges
/// keep the lower id as the survivor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub u64);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RegionId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Identifies a registered region-local data kind.
///
/// `DataKindId(n)` is the n-th kind registered with a data registry and
/// doubles as the slot index inside every region's data table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataKindId(pub u32);

impl fmt::Display for DataKindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DataKindId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Index of a tick worker thread in the scheduler's pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u32);

impl WorkerId {
    /// The worker index as a `usize`, for indexing per-worker tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for WorkerId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_ids_order_by_age() {
        assert!(RegionId(1) < RegionId(2));
        assert_eq!(RegionId::from(7), RegionId(7));
        assert_eq!(format!("{}", RegionId(42)), "42");
    }

    #[test]
    fn worker_id_displays_with_ordinal_prefix() {
        assert_eq!(format!("{}", WorkerId(3)), "#3");
        assert_eq!(WorkerId(3).index(), 3);
    }
}
