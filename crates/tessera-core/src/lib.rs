//! Core types for the Tessera spatial regionizer.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the identifiers, cell/section coordinate packing, and the error
//! taxonomy shared by the regionizer and the tick scheduler.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod coord;
pub mod error;
pub mod id;

pub use coord::{CellPos, SectionPos};
pub use error::{CallbackPhase, FatalError, FatalPolicy, RegionizerError};
pub use id::{DataKindId, RegionId, WorkerId};
