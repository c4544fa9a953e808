//! Error types shared across the Tessera workspace.
//!
//! Two tiers: recoverable errors that leave the world unchanged
//! ([`RegionizerError::CellNotPresent`]), and [`FatalError`]s raised when a
//! concurrency contract is broken inside the structural critical section.
//! A fatal error poisons the world; what happens next is governed by
//! [`FatalPolicy`].

use std::error::Error;
use std::fmt;

use crate::id::RegionId;

/// What the regionizer does after recording a [`FatalError`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FatalPolicy {
    /// Log the error and abort the process.
    #[default]
    Abort,
    /// Log the error, poison the world, and return the error to the
    /// caller. Every later structural operation fails with
    /// [`RegionizerError::Poisoned`].
    Poison,
}

/// Which region-local data callback was executing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackPhase {
    /// `create`, invoked while preparing a merge or split target.
    Create,
    /// `merge(from, into, tick_offset)`.
    Merge,
    /// `split(from, shift, targets)`.
    Split,
}

impl fmt::Display for CallbackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Merge => write!(f, "merge"),
            Self::Split => write!(f, "split"),
        }
    }
}

/// Unrecoverable breach of a structural or scheduling contract.
///
/// Once raised there is no safe partial-failure recovery: the region set
/// may be half merged or half split.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FatalError {
    /// A region-local data callback panicked under the structural lock.
    CallbackPanicked {
        /// Name of the data kind whose callback failed.
        kind: String,
        /// The callback that failed.
        phase: CallbackPhase,
    },
    /// A stored data instance did not have the type its kind declares.
    KindMismatch {
        /// Name of the data kind.
        kind: String,
    },
    /// A lifecycle hook panicked under the structural lock.
    HookPanicked {
        /// Which hook panicked.
        hook: &'static str,
    },
    /// A region died while a pin still referenced it.
    PinnedRegionDied {
        /// The dead region.
        region: RegionId,
    },
    /// A worker picked up the handle of a region that is already dead
    /// while the handle was pinned.
    DeadRegionScheduled {
        /// The dead region.
        region: RegionId,
    },
    /// A live region had no scheduling handle.
    MissingHandle {
        /// The region without a handle.
        region: RegionId,
    },
    /// A scheduling handle had no assigned worker when one was required.
    MissingWorker {
        /// The region whose handle was unassigned.
        region: RegionId,
    },
    /// No region owned a cell that was just made present.
    MissingRegion {
        /// Cell x coordinate.
        x: i32,
        /// Cell z coordinate.
        z: i32,
    },
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CallbackPanicked { kind, phase } => {
                write!(f, "region data kind '{kind}' panicked in {phase} callback")
            }
            Self::KindMismatch { kind } => {
                write!(f, "region data kind '{kind}' holds a value of the wrong type")
            }
            Self::HookPanicked { hook } => write!(f, "region hook '{hook}' panicked"),
            Self::PinnedRegionDied { region } => {
                write!(f, "region {region} died while pinned")
            }
            Self::DeadRegionScheduled { region } => {
                write!(f, "pinned handle of dead region {region} was scheduled")
            }
            Self::MissingHandle { region } => {
                write!(f, "region {region} has no scheduling handle")
            }
            Self::MissingWorker { region } => {
                write!(f, "region {region} scheduling handle has no worker")
            }
            Self::MissingRegion { x, z } => {
                write!(f, "no region owns present cell ({x}, {z})")
            }
        }
    }
}

impl Error for FatalError {}

/// Errors from regionizer operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegionizerError {
    /// `remove_cell` on a cell that is not present. State is unchanged.
    CellNotPresent {
        /// Cell x coordinate.
        x: i32,
        /// Cell z coordinate.
        z: i32,
    },
    /// An earlier fatal error poisoned this world.
    Poisoned(FatalError),
    /// This operation hit a fatal error and poisoned the world.
    Fatal(FatalError),
}

impl RegionizerError {
    /// Whether this error leaves the world unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Poisoned(_) | Self::Fatal(_))
    }
}

impl fmt::Display for RegionizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CellNotPresent { x, z } => write!(f, "cell ({x}, {z}) is not present"),
            Self::Poisoned(e) => write!(f, "world is poisoned: {e}"),
            Self::Fatal(e) => write!(f, "fatal: {e}"),
        }
    }
}

impl Error for RegionizerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Poisoned(e) | Self::Fatal(e) => Some(e),
            Self::CellNotPresent { .. } => None,
        }
    }
}

impl From<FatalError> for RegionizerError {
    fn from(e: FatalError) -> Self {
        Self::Fatal(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_policy_defaults_to_abort() {
        assert_eq!(FatalPolicy::default(), FatalPolicy::Abort);
    }

    #[test]
    fn callback_panic_names_kind_and_phase() {
        let err = FatalError::CallbackPanicked {
            kind: "counter".into(),
            phase: CallbackPhase::Split,
        };
        let msg = err.to_string();
        assert!(msg.contains("counter"));
        assert!(msg.contains("split"));
    }

    #[test]
    fn regionizer_error_exposes_fatal_source() {
        let err = RegionizerError::from(FatalError::PinnedRegionDied {
            region: RegionId(9),
        });
        assert!(err.is_fatal());
        assert!(err.source().is_some());
        assert!(err.to_string().contains("region 9 died while pinned"));

        let benign = RegionizerError::CellNotPresent { x: 1, z: -2 };
        assert!(!benign.is_fatal());
        assert!(benign.source().is_none());
        assert_eq!(benign.to_string(), "cell (1, -2) is not present");
    }
}
