//! World configuration, validation, and error types.
//!
//! [`WorldConfig`] bundles the regionizer tuning, the scheduler pool
//! settings, and the world border. [`validate()`](WorldConfig::validate)
//! checks every invariant up front so that [`World::new`](crate::World::new)
//! never starts threads against a bad configuration.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use tessera_core::CellPos;
use tessera_region::{RegionizerConfig, RegionizerConfigError};

// ── SchedulerConfig ────────────────────────────────────────────────

/// Configuration for the region tick worker pool.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Number of tick worker threads. `None` = auto-detect
    /// (`available_parallelism`, clamped to `[1, 64]`).
    pub worker_count: Option<usize>,
    /// Nominal ticks per second for every region. Default: 20.
    pub tick_rate_hz: f64,
    /// How long a due task may wait on its owner's queue before another
    /// worker may take it, in milliseconds. Default: 5.
    pub steal_threshold_ms: u64,
    /// Upper bound on cross-thread region queries, in milliseconds.
    /// Default: 5000.
    pub query_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            tick_rate_hz: 20.0,
            steal_threshold_ms: 5,
            query_timeout_ms: 5_000,
        }
    }
}

impl SchedulerConfig {
    /// Resolve the actual worker count, applying auto-detection if `None`.
    ///
    /// Explicit values are clamped to `[1, 64]`.
    pub fn resolved_worker_count(&self) -> usize {
        match self.worker_count {
            Some(n) => n.clamp(1, 64),
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
                .clamp(1, 64),
        }
    }

    /// Nanoseconds between two scheduled starts of the same region.
    pub fn tick_interval_nanos(&self) -> u64 {
        (1e9 / self.tick_rate_hz) as u64
    }

    /// Steal threshold as nanoseconds.
    pub fn steal_threshold_nanos(&self) -> u64 {
        self.steal_threshold_ms.saturating_mul(1_000_000)
    }

    /// Query timeout as a [`Duration`].
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

// ── WorldBounds ────────────────────────────────────────────────────

/// Inclusive cell-coordinate rectangle of the world border.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorldBounds {
    /// Smallest x.
    pub min_x: i32,
    /// Smallest z.
    pub min_z: i32,
    /// Largest x.
    pub max_x: i32,
    /// Largest z.
    pub max_z: i32,
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self {
            min_x: -1_874_999,
            min_z: -1_874_999,
            max_x: 1_874_999,
            max_z: 1_874_999,
        }
    }
}

impl WorldBounds {
    /// Whether `cell` lies inside the border.
    pub fn contains(&self, cell: CellPos) -> bool {
        (self.min_x..=self.max_x).contains(&cell.x) && (self.min_z..=self.max_z).contains(&cell.z)
    }
}

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected during [`WorldConfig::validate()`] or world startup.
#[derive(Debug, PartialEq)]
pub enum ConfigError {
    /// Regionizer configuration is invalid.
    Regionizer(RegionizerConfigError),
    /// tick_rate_hz is NaN, infinite, zero, negative, or above 1 MHz.
    InvalidTickRate {
        /// The invalid value.
        value: f64,
    },
    /// query_timeout_ms is zero.
    QueryTimeoutZero,
    /// World bounds have min above max on some axis.
    InvalidBounds {
        /// The offending bounds.
        bounds: WorldBounds,
    },
    /// A background thread could not be spawned.
    ThreadSpawnFailed {
        /// Description of which thread failed.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regionizer(e) => write!(f, "regionizer: {e}"),
            Self::InvalidTickRate { value } => {
                write!(f, "tick_rate_hz must be finite, positive and at most 1e6, got {value}")
            }
            Self::QueryTimeoutZero => write!(f, "query_timeout_ms must be at least 1"),
            Self::InvalidBounds { bounds } => write!(
                f,
                "world bounds [{}, {}]..[{}, {}] are inverted",
                bounds.min_x, bounds.min_z, bounds.max_x, bounds.max_z
            ),
            Self::ThreadSpawnFailed { reason } => {
                write!(f, "thread spawn failed: {reason}")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Regionizer(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RegionizerConfigError> for ConfigError {
    fn from(e: RegionizerConfigError) -> Self {
        Self::Regionizer(e)
    }
}

// ── WorldConfig ────────────────────────────────────────────────────

/// Complete configuration for a [`World`](crate::World).
#[derive(Clone, Debug, Default)]
pub struct WorldConfig {
    /// Regionizer tuning.
    pub regionizer: RegionizerConfig,
    /// Worker pool settings.
    pub scheduler: SchedulerConfig,
    /// World border, used to validate observation areas.
    pub bounds: WorldBounds,
}

impl WorldConfig {
    /// Validate every invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.regionizer.validate()?;

        let hz = self.scheduler.tick_rate_hz;
        if !hz.is_normal() || hz <= 0.0 || hz > 1e6 {
            return Err(ConfigError::InvalidTickRate { value: hz });
        }
        if self.scheduler.query_timeout_ms == 0 {
            return Err(ConfigError::QueryTimeoutZero);
        }
        let b = self.bounds;
        if b.min_x > b.max_x || b.min_z > b.max_z {
            return Err(ConfigError::InvalidBounds { bounds: b });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_succeeds() {
        assert!(WorldConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_bad_regionizer_config_fails() {
        let mut cfg = WorldConfig::default();
        cfg.regionizer.merge_radius = 0;
        match cfg.validate() {
            Err(ConfigError::Regionizer(RegionizerConfigError::MergeRadiusTooSmall { .. })) => {}
            other => panic!("expected Regionizer error, got {other:?}"),
        }
    }

    #[test]
    fn validate_tick_rate_rejects_nonsense() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e-320, 2e6] {
            let mut cfg = WorldConfig::default();
            cfg.scheduler.tick_rate_hz = bad;
            match cfg.validate() {
                Err(ConfigError::InvalidTickRate { .. }) => {}
                other => panic!("expected InvalidTickRate for {bad}, got {other:?}"),
            }
        }
    }

    #[test]
    fn validate_zero_query_timeout_fails() {
        let mut cfg = WorldConfig::default();
        cfg.scheduler.query_timeout_ms = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::QueryTimeoutZero));
    }

    #[test]
    fn validate_inverted_bounds_fails() {
        let mut cfg = WorldConfig::default();
        cfg.bounds.min_x = 10;
        cfg.bounds.max_x = -10;
        match cfg.validate() {
            Err(ConfigError::InvalidBounds { .. }) => {}
            other => panic!("expected InvalidBounds, got {other:?}"),
        }
    }

    #[test]
    fn resolved_worker_count_clamps() {
        let zero = SchedulerConfig {
            worker_count: Some(0),
            ..Default::default()
        };
        assert_eq!(zero.resolved_worker_count(), 1);
        let huge = SchedulerConfig {
            worker_count: Some(500),
            ..Default::default()
        };
        assert_eq!(huge.resolved_worker_count(), 64);
        let auto = SchedulerConfig::default().resolved_worker_count();
        assert!((1..=64).contains(&auto));
    }

    #[test]
    fn interval_follows_tick_rate() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.tick_interval_nanos(), 50_000_000);
        assert_eq!(cfg.steal_threshold_nanos(), 5_000_000);
    }

    #[test]
    fn default_bounds_match_world_border() {
        let b = WorldBounds::default();
        assert!(b.contains(CellPos::new(1_874_999, -1_874_999)));
        assert!(!b.contains(CellPos::new(1_875_000, 0)));
    }

    #[test]
    fn thread_spawn_failed_error_display() {
        let err = ConfigError::ThreadSpawnFailed {
            reason: "region worker #0".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("thread spawn failed"));
        assert!(msg.contains("region worker #0"));
    }
}
