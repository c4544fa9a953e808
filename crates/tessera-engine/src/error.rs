//! Error types for observation sessions, cross-thread queries, and tick
//! callbacks.
//!
//! Fatal conditions are not represented here: they are
//! [`FatalError`]s recorded by the regionizer's poison state.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use tessera_core::{CellPos, FatalError, RegionizerError};

// ── ObservationError ───────────────────────────────────────────────

/// Errors from starting or stopping an observation session.
#[derive(Clone, Debug, PartialEq)]
pub enum ObservationError {
    /// Part of the requested area lies outside the world border.
    OutOfWorld {
        /// First corner as given.
        from: CellPos,
        /// Opposite corner as given.
        to: CellPos,
    },
    /// The requested area exceeds the observation cell ceiling.
    TooManyCells {
        /// Largest accepted area, in cells.
        ceiling: u64,
        /// Requested area, in cells.
        requested: u64,
    },
    /// A session is already active.
    AlreadyObserving,
    /// No session is active.
    NotObserving,
    /// The observation mode string is not recognised.
    UnknownMode {
        /// The string that failed to parse.
        value: String,
    },
    /// Loading or releasing the observed cells failed.
    Regionizer(RegionizerError),
    /// Establishing the pin hit a fatal contract violation.
    Fatal(FatalError),
}

impl fmt::Display for ObservationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfWorld { from, to } => {
                write!(f, "area {from}..{to} is outside the world border")
            }
            Self::TooManyCells { ceiling, requested } => write!(
                f,
                "observation area is limited to {ceiling} cells, requested {requested}"
            ),
            Self::AlreadyObserving => write!(f, "an observation session is already running"),
            Self::NotObserving => write!(f, "no observation session is running"),
            Self::UnknownMode { value } => {
                write!(f, "unknown observation mode '{value}' (expected 'global' or 'area')")
            }
            Self::Regionizer(e) => write!(f, "regionizer: {e}"),
            Self::Fatal(e) => write!(f, "fatal: {e}"),
        }
    }
}

impl Error for ObservationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Regionizer(e) => Some(e),
            Self::Fatal(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RegionizerError> for ObservationError {
    fn from(e: RegionizerError) -> Self {
        Self::Regionizer(e)
    }
}

// ── QueryError ─────────────────────────────────────────────────────

/// Errors from a bounded-wait cross-thread region query.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryError {
    /// The addressed cell is not present, so no region owns it.
    CellNotPresent {
        /// Cell x.
        x: i32,
        /// Cell z.
        z: i32,
    },
    /// The owning region did not run the query within the bound.
    Timeout {
        /// How long the caller waited.
        waited: Duration,
    },
    /// The query was discarded before it ran.
    Dropped,
    /// The world is poisoned.
    Poisoned(FatalError),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CellNotPresent { x, z } => write!(f, "cell ({x}, {z}) is not present"),
            Self::Timeout { waited } => {
                write!(f, "region query timed out after {}ms", waited.as_millis())
            }
            Self::Dropped => write!(f, "region query was dropped before it ran"),
            Self::Poisoned(e) => write!(f, "world is poisoned: {e}"),
        }
    }
}

impl Error for QueryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Poisoned(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RegionizerError> for QueryError {
    fn from(e: RegionizerError) -> Self {
        match e {
            RegionizerError::CellNotPresent { x, z } => Self::CellNotPresent { x, z },
            RegionizerError::Poisoned(f) | RegionizerError::Fatal(f) => Self::Poisoned(f),
        }
    }
}

// ── TickError ──────────────────────────────────────────────────────

/// A failed region or global tick. Logged and counted; scheduling goes on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickError {
    /// The tick handler returned an error.
    Failed {
        /// Handler-supplied description.
        reason: String,
    },
    /// The tick handler panicked.
    Panicked {
        /// Panic payload, if it was a string.
        message: String,
    },
}

impl fmt::Display for TickError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "tick failed: {reason}"),
            Self::Panicked { message } => write!(f, "tick panicked: {message}"),
        }
    }
}

impl Error for TickError {}
