//! Tick scheduling, thread pinning, and the world facade for Tessera.
//!
//! A [`World`] owns a [`Regionizer`](tessera_region::Regionizer) and a
//! [`Scheduler`] whose worker pool ticks every region (and one global
//! tick) at the configured rate. Workers steal overdue work from each
//! other except where an observation session has pinned a handle to one
//! worker. Per-handle rolling statistics back the [`TickReport`] queries.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod error;
pub mod handle;
pub mod observe;
pub mod pin;
pub mod scheduler;
pub mod stats;
pub mod tick;
pub mod world;

pub use config::{ConfigError, SchedulerConfig, WorldBounds, WorldConfig};
pub use error::{ObservationError, QueryError, TickError};
pub use handle::{HandleTarget, ScheduleHandle};
pub use observe::{
    thread_group_name, AreaPinner, GlobalPinner, HandlePinner, ObservationControl,
    ObservationMode, PinContext, MAX_OBSERVED_CELLS,
};
pub use pin::{PinFilter, TaskView};
pub use scheduler::{run_worker, PinTarget, Scheduler};
pub use stats::{TickHorizon, TickReport, TickStats};
pub use tick::{GlobalTickContext, RegionTickContext, TickHandler};
pub use world::{ObservationRequest, ShutdownReport, World};
