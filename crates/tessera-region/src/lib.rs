//! Spatial regionizer for Tessera.
//!
//! Partitions a 2-D grid of cells into regions that can be ticked
//! independently. Cells that come within the merge radius of each other
//! end up in the same region; regions that lose their connecting cells
//! are compacted and split. Each region carries a table of typed
//! region-local data whose merge and split callbacks run inside the
//! structural critical section.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod data;
pub mod hooks;
pub mod region;
pub mod regionizer;

pub use config::{RegionizerConfig, RegionizerConfigError, MAX_MERGE_RADIUS};
pub use data::{DataKind, DataRegistry, DataRegistryBuilder, RegionData, RegionLocal, SplitTargets};
pub use hooks::{NoopHooks, RegionHooks, SplitLayout};
pub use region::{Region, RegionState, RegionTask};
pub use regionizer::Regionizer;
