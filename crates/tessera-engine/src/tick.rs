//! The tick callback seam and the contexts handed to it.

use std::sync::Arc;

use tessera_core::WorkerId;
use tessera_region::{DataKind, Region, RegionData, Regionizer};

use crate::error::TickError;

/// Simulation logic run by the worker pool.
///
/// Implementations must not block indefinitely. An `Err` or a panic is a
/// failed tick: it is logged and counted on the handle, and the region
/// keeps being scheduled.
pub trait TickHandler: Send + Sync + 'static {
    /// Run one tick of a region.
    fn tick_region(&self, ctx: &mut RegionTickContext<'_>) -> Result<(), TickError>;

    /// Run one world-wide tick. Defaults to doing nothing.
    fn tick_global(&self, ctx: &mut GlobalTickContext<'_>) -> Result<(), TickError> {
        let _ = ctx;
        Ok(())
    }
}

/// What a region tick can see and touch.
pub struct RegionTickContext<'a> {
    region: &'a Arc<Region>,
    data: &'a mut RegionData,
    regionizer: &'a Regionizer,
    worker: WorkerId,
}

impl<'a> RegionTickContext<'a> {
    pub(crate) fn new(
        region: &'a Arc<Region>,
        data: &'a mut RegionData,
        regionizer: &'a Regionizer,
        worker: WorkerId,
    ) -> Self {
        Self {
            region,
            data,
            regionizer,
            worker,
        }
    }

    /// The region being ticked.
    pub fn region(&self) -> &Arc<Region> {
        self.region
    }

    /// Completed ticks before this one.
    pub fn tick(&self) -> u64 {
        self.region.tick()
    }

    /// Worker running this tick.
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// The region's local data table.
    pub fn data(&mut self) -> &mut RegionData {
        self.data
    }

    /// Shorthand for `data().get_or_create(kind)`.
    pub fn get_or_create<T: 'static>(&mut self, kind: &DataKind<T>) -> &mut T {
        self.data.get_or_create(kind)
    }

    /// Owner of cell `(x, z)` from the published index. Membership of
    /// the ticking region cannot change mid-tick, so this is exact for
    /// cells of this region.
    pub fn region_at_unsynchronized(&self, x: i32, z: i32) -> Option<Arc<Region>> {
        self.regionizer.region_at_unsynchronized(x, z)
    }
}

/// What the global tick can see.
pub struct GlobalTickContext<'a> {
    regionizer: &'a Regionizer,
    worker: WorkerId,
    tick: u64,
}

impl<'a> GlobalTickContext<'a> {
    pub(crate) fn new(regionizer: &'a Regionizer, worker: WorkerId, tick: u64) -> Self {
        Self {
            regionizer,
            worker,
            tick,
        }
    }

    /// Completed global ticks before this one.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Worker running this tick.
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// The world's regionizer.
    pub fn regionizer(&self) -> &Regionizer {
        self.regionizer
    }
}
