//! Tessera: a spatial regionizer and region tick scheduler.
//!
//! This is the top-level facade crate that re-exports the public API from
//! the Tessera sub-crates.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use tessera::prelude::*;
//!
//! #[derive(Default)]
//! struct Ticks(u64);
//!
//! impl RegionLocal for Ticks {
//!     fn create(_region: RegionId) -> Self { Ticks(0) }
//!     fn merge(self, into: &mut Self, _tick_offset: i64) { into.0 += self.0; }
//!     fn split(self, _shift: u32, targets: &mut SplitTargets<'_, Self>) {
//!         if let Some(first) = targets.get_mut(0) { first.0 += self.0; }
//!     }
//! }
//!
//! struct CountTicks(DataKind<Ticks>);
//!
//! impl TickHandler for CountTicks {
//!     fn tick_region(&self, ctx: &mut RegionTickContext<'_>) -> Result<(), TickError> {
//!         ctx.get_or_create(&self.0).0 += 1;
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = DataRegistry::builder();
//! let ticks = registry.register::<Ticks>("ticks");
//! let config = WorldConfig {
//!     scheduler: SchedulerConfig { worker_count: Some(2), ..Default::default() },
//!     ..Default::default()
//! };
//! let mut world = World::new(config, registry.build(), Arc::new(CountTicks(ticks))).unwrap();
//! world.add_cell(0, 0).unwrap();
//! world.add_cell(1, 0).unwrap();
//! assert_eq!(world.region_count(), 1);
//! let report = world.shutdown();
//! assert_eq!(report.workers_joined, 2);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `tessera-core` | IDs, coordinates, fatal and regionizer errors |
//! | [`region`] | `tessera-region` | Regionizer, regions, region-local data |
//! | [`engine`] | `tessera-engine` | Scheduler, statistics, pinning, `World` |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types (`tessera-core`).
///
/// Ids, cell and section coordinates with their 64-bit packing, and the
/// [`types::FatalError`] taxonomy.
pub use tessera_core as types;

/// The regionizer (`tessera-region`).
///
/// [`region::Regionizer`] owns the regions of one world;
/// [`region::RegionLocal`] declares typed per-region state.
pub use tessera_region as region;

/// Scheduling and observation (`tessera-engine`).
///
/// [`engine::World`] ties a regionizer to a worker pool; observation
/// sessions pin one region or the global tick to a single worker.
pub use tessera_engine as engine;

/// Common imports for typical Tessera usage.
pub mod prelude {
    // Core
    pub use tessera_core::{
        CellPos, FatalError, FatalPolicy, RegionId, RegionizerError, SectionPos, WorkerId,
    };

    // Region
    pub use tessera_region::{
        DataKind, DataRegistry, Region, RegionData, RegionLocal, Regionizer, RegionizerConfig,
        SplitTargets,
    };

    // Engine
    pub use tessera_engine::{
        GlobalTickContext, ObservationError, ObservationMode, ObservationRequest, QueryError,
        RegionTickContext, SchedulerConfig, TickError, TickHandler, TickHorizon, TickReport,
        World, WorldConfig,
    };
}
