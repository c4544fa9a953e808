//! Lifecycle hooks invoked by the regionizer under its structural lock.
//!
//! The scheduler implements [`RegionHooks`] to keep its per-region
//! schedule handles and any active pin in step with merges and splits.
//! Hooks run inside the structural critical section: they must not block
//! on anything that could wait for the regionizer, and an `Err` (or a
//! panic) is a fatal contract violation.

use std::collections::HashMap;
use std::sync::Arc;

use tessera_core::coord::section_key_of;
use tessera_core::FatalError;

use crate::region::Region;

/// Section-to-child routing of a split, as seen by [`RegionHooks::on_split`].
#[derive(Debug)]
pub struct SplitLayout<'a> {
    shift: u32,
    section_to_child: &'a HashMap<u64, usize>,
}

impl<'a> SplitLayout<'a> {
    pub(crate) fn new(shift: u32, section_to_child: &'a HashMap<u64, usize>) -> Self {
        Self {
            shift,
            section_to_child,
        }
    }

    /// Section shift in effect.
    pub fn shift(&self) -> u32 {
        self.shift
    }

    /// Index of the child owning `section_key`.
    pub fn child_of_section(&self, section_key: u64) -> Option<usize> {
        self.section_to_child.get(&section_key).copied()
    }

    /// Index of the child owning the section that holds cell `(x, z)`.
    pub fn child_of_cell(&self, x: i32, z: i32) -> Option<usize> {
        self.child_of_section(section_key_of(x, z, self.shift))
    }
}

/// Observer of region lifecycle events.
///
/// Every method defaults to a no-op.
pub trait RegionHooks: Send + Sync {
    /// A region was created for newly present cells. It is still
    /// `Transient` and becomes `Ready` once the structural operation ends.
    fn on_create(&self, region: &Arc<Region>) -> Result<(), FatalError> {
        let _ = region;
        Ok(())
    }

    /// `from` was merged into `into`. `from` is about to be marked dead.
    fn on_merge(&self, from: &Arc<Region>, into: &Arc<Region>) -> Result<(), FatalError> {
        let _ = (from, into);
        Ok(())
    }

    /// `from` was split into `children`, indexed as in `layout`.
    fn on_split(
        &self,
        from: &Arc<Region>,
        children: &[Arc<Region>],
        layout: &SplitLayout<'_>,
    ) -> Result<(), FatalError> {
        let _ = (from, children, layout);
        Ok(())
    }

    /// `region` lost its last section and is about to be marked dead.
    fn on_destroy(&self, region: &Arc<Region>) -> Result<(), FatalError> {
        let _ = region;
        Ok(())
    }
}

/// Hooks that observe nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl RegionHooks for NoopHooks {}
