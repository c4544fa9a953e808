//! Regionizer configuration and validation.

use std::error::Error;
use std::fmt;

use tessera_core::FatalPolicy;

/// Largest accepted section shift. A shift of 16 already groups
/// 65 536 × 65 536 cells into one section.
pub const MAX_SECTION_SHIFT: u32 = 16;

/// Largest accepted merge radius, in sections. Every structural step
/// scans `(2r + 1)²` neighbours under the structural lock.
pub const MAX_MERGE_RADIUS: i32 = 8;

// ── RegionizerConfig ───────────────────────────────────────────────

/// Tuning for a [`Regionizer`](crate::Regionizer).
#[derive(Clone, Debug)]
pub struct RegionizerConfig {
    /// Right shift from cell coordinates to section coordinates.
    /// Default: 4 (16 × 16 cells per section).
    pub section_shift: u32,
    /// Sections within this Chebyshev distance of each other must share a
    /// region. Default: 1.
    pub merge_radius: i32,
    /// When a section gains its first cell, every missing section within
    /// this radius is created as a buffer. Default: 1.
    pub empty_section_create_radius: i32,
    /// Fraction of dead sections above which a region is compacted.
    /// Default: 0.20.
    pub max_dead_section_percent: f64,
    /// What to do after a fatal contract violation. Default: abort.
    pub fatal_policy: FatalPolicy,
}

impl Default for RegionizerConfig {
    fn default() -> Self {
        Self {
            section_shift: 4,
            merge_radius: 1,
            empty_section_create_radius: 1,
            max_dead_section_percent: 0.20,
            fatal_policy: FatalPolicy::Abort,
        }
    }
}

impl RegionizerConfig {
    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), RegionizerConfigError> {
        if self.section_shift > MAX_SECTION_SHIFT {
            return Err(RegionizerConfigError::SectionShiftTooLarge {
                value: self.section_shift,
            });
        }
        if self.merge_radius < 1 {
            return Err(RegionizerConfigError::MergeRadiusTooSmall {
                value: self.merge_radius,
            });
        }
        if self.merge_radius > MAX_MERGE_RADIUS {
            return Err(RegionizerConfigError::MergeRadiusTooLarge {
                value: self.merge_radius,
            });
        }
        if self.empty_section_create_radius < 0
            || self.empty_section_create_radius > self.merge_radius
        {
            return Err(RegionizerConfigError::EmptyRadiusOutOfRange {
                value: self.empty_section_create_radius,
                merge_radius: self.merge_radius,
            });
        }
        let p = self.max_dead_section_percent;
        if !p.is_finite() || p <= 0.0 || p > 1.0 {
            return Err(RegionizerConfigError::DeadPercentOutOfRange { value: p });
        }
        Ok(())
    }
}

// ── RegionizerConfigError ──────────────────────────────────────────

/// Errors detected by [`RegionizerConfig::validate()`].
#[derive(Clone, Debug, PartialEq)]
pub enum RegionizerConfigError {
    /// `section_shift` exceeds [`MAX_SECTION_SHIFT`].
    SectionShiftTooLarge {
        /// The configured shift.
        value: u32,
    },
    /// `merge_radius` is below 1.
    MergeRadiusTooSmall {
        /// The configured radius.
        value: i32,
    },
    /// `merge_radius` exceeds [`MAX_MERGE_RADIUS`].
    MergeRadiusTooLarge {
        /// The configured radius.
        value: i32,
    },
    /// `empty_section_create_radius` is negative or above `merge_radius`.
    EmptyRadiusOutOfRange {
        /// The configured radius.
        value: i32,
        /// The configured merge radius.
        merge_radius: i32,
    },
    /// `max_dead_section_percent` is not in `(0, 1]`.
    DeadPercentOutOfRange {
        /// The configured fraction.
        value: f64,
    },
}

impl fmt::Display for RegionizerConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SectionShiftTooLarge { value } => {
                write!(f, "section_shift {value} exceeds maximum of {MAX_SECTION_SHIFT}")
            }
            Self::MergeRadiusTooSmall { value } => {
                write!(f, "merge_radius must be at least 1, got {value}")
            }
            Self::MergeRadiusTooLarge { value } => {
                write!(f, "merge_radius {value} exceeds maximum of {MAX_MERGE_RADIUS}")
            }
            Self::EmptyRadiusOutOfRange {
                value,
                merge_radius,
            } => write!(
                f,
                "empty_section_create_radius {value} must be in 0..={merge_radius}"
            ),
            Self::DeadPercentOutOfRange { value } => {
                write!(f, "max_dead_section_percent must be in (0, 1], got {value}")
            }
        }
    }
}

impl Error for RegionizerConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RegionizerConfig::default().validate().is_ok());
    }

    #[test]
    fn shift_above_limit_fails() {
        let cfg = RegionizerConfig {
            section_shift: 17,
            ..Default::default()
        };
        match cfg.validate() {
            Err(RegionizerConfigError::SectionShiftTooLarge { value: 17 }) => {}
            other => panic!("expected SectionShiftTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn zero_merge_radius_fails() {
        let cfg = RegionizerConfig {
            merge_radius: 0,
            empty_section_create_radius: 0,
            ..Default::default()
        };
        match cfg.validate() {
            Err(RegionizerConfigError::MergeRadiusTooSmall { .. }) => {}
            other => panic!("expected MergeRadiusTooSmall, got {other:?}"),
        }
    }

    #[test]
    fn merge_radius_above_limit_fails() {
        let cfg = RegionizerConfig {
            merge_radius: MAX_MERGE_RADIUS + 1,
            ..Default::default()
        };
        match cfg.validate() {
            Err(RegionizerConfigError::MergeRadiusTooLarge { value: 9 }) => {}
            other => panic!("expected MergeRadiusTooLarge, got {other:?}"),
        }
        let widest = RegionizerConfig {
            merge_radius: MAX_MERGE_RADIUS,
            empty_section_create_radius: MAX_MERGE_RADIUS,
            ..Default::default()
        };
        assert!(widest.validate().is_ok());
    }

    #[test]
    fn empty_radius_above_merge_radius_fails() {
        let cfg = RegionizerConfig {
            merge_radius: 1,
            empty_section_create_radius: 2,
            ..Default::default()
        };
        match cfg.validate() {
            Err(RegionizerConfigError::EmptyRadiusOutOfRange {
                value: 2,
                merge_radius: 1,
            }) => {}
            other => panic!("expected EmptyRadiusOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn dead_percent_bounds() {
        for bad in [0.0, -0.5, 1.5, f64::NAN] {
            let cfg = RegionizerConfig {
                max_dead_section_percent: bad,
                ..Default::default()
            };
            match cfg.validate() {
                Err(RegionizerConfigError::DeadPercentOutOfRange { .. }) => {}
                other => panic!("expected DeadPercentOutOfRange for {bad}, got {other:?}"),
            }
        }
        let full = RegionizerConfig {
            max_dead_section_percent: 1.0,
            ..Default::default()
        };
        assert!(full.validate().is_ok());
    }
}
