//! Per-region (and global) schedule handles.
//!
//! A [`ScheduleHandle`] is the scheduler's view of one tickable unit: when
//! it should next run, which worker queue owns it, which worker is running
//! it right now, and whether it is pinned. Worker references are atomics
//! holding a [`WorkerId`] index or [`NO_WORKER`].

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tessera_core::{RegionId, WorkerId};
use tessera_region::Region;

use crate::stats::{TickHorizon, TickReport, TickStats};

/// Sentinel meaning "no worker".
pub const NO_WORKER: u32 = u32::MAX;

/// What a handle ticks.
#[derive(Clone, Debug)]
pub enum HandleTarget {
    /// One region.
    Region(Arc<Region>),
    /// The world-wide tick.
    Global,
}

/// Scheduling state of one region or of the global tick.
#[derive(Debug)]
pub struct ScheduleHandle {
    target: HandleTarget,
    stats: Mutex<TickStats>,
    owner: AtomicU32,
    running_on: AtomicU32,
    pinned_to: AtomicU32,
    next_start_nanos: AtomicU64,
    cancelled: AtomicBool,
    tick_failures: AtomicU64,
}

// Compile-time assertion: ScheduleHandle must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<ScheduleHandle>();
};

fn load_worker(cell: &AtomicU32) -> Option<WorkerId> {
    match cell.load(Ordering::Acquire) {
        NO_WORKER => None,
        n => Some(WorkerId(n)),
    }
}

fn store_worker(cell: &AtomicU32, worker: Option<WorkerId>) {
    cell.store(worker.map_or(NO_WORKER, |w| w.0), Ordering::Release);
}

impl ScheduleHandle {
    pub(crate) fn new(target: HandleTarget, stats: TickStats, owner: WorkerId, next_start: u64) -> Self {
        Self {
            target,
            stats: Mutex::new(stats),
            owner: AtomicU32::new(owner.0),
            running_on: AtomicU32::new(NO_WORKER),
            pinned_to: AtomicU32::new(NO_WORKER),
            next_start_nanos: AtomicU64::new(next_start),
            cancelled: AtomicBool::new(false),
            tick_failures: AtomicU64::new(0),
        }
    }

    /// What this handle ticks.
    pub fn target(&self) -> &HandleTarget {
        &self.target
    }

    /// The region ticked, or `None` for the global handle.
    pub fn region(&self) -> Option<&Arc<Region>> {
        match &self.target {
            HandleTarget::Region(r) => Some(r),
            HandleTarget::Global => None,
        }
    }

    /// Region id, or `None` for the global handle.
    pub fn region_id(&self) -> Option<RegionId> {
        self.region().map(|r| r.id())
    }

    /// Worker whose queue holds this handle.
    pub fn owner(&self) -> Option<WorkerId> {
        load_worker(&self.owner)
    }

    /// Worker running the tick right now, if any.
    pub fn current_worker(&self) -> Option<WorkerId> {
        load_worker(&self.running_on)
    }

    /// Worker this handle is pinned to, if any.
    pub fn pinned_to(&self) -> Option<WorkerId> {
        load_worker(&self.pinned_to)
    }

    /// Whether this handle is pinned.
    pub fn is_pinned(&self) -> bool {
        self.pinned_to().is_some()
    }

    /// Monotonic time of the next scheduled start.
    pub fn next_start_nanos(&self) -> u64 {
        self.next_start_nanos.load(Ordering::Acquire)
    }

    /// Whether the handle has been retired by a merge, split, or destroy.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Ticks that failed or panicked.
    pub fn tick_failures(&self) -> u64 {
        self.tick_failures.load(Ordering::Acquire)
    }

    /// Report over `horizon` at monotonic time `now_nanos`.
    pub fn tick_report(
        &self,
        horizon: TickHorizon,
        now_nanos: u64,
        tick_interval_nanos: u64,
        tick_rate_hz: f64,
    ) -> TickReport {
        self.lock_stats()
            .report(horizon, now_nanos, tick_interval_nanos, tick_rate_hz)
    }

    // ── Scheduler-side ─────────────────────────────────────────────

    pub(crate) fn set_owner(&self, worker: WorkerId) {
        store_worker(&self.owner, Some(worker));
    }

    pub(crate) fn set_running_on(&self, worker: Option<WorkerId>) {
        store_worker(&self.running_on, worker);
    }

    pub(crate) fn set_pinned_to(&self, worker: Option<WorkerId>) {
        store_worker(&self.pinned_to, worker);
    }

    pub(crate) fn set_next_start(&self, nanos: u64) {
        self.next_start_nanos.store(nanos, Ordering::Release);
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn record_failure(&self) {
        self.tick_failures.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_tick(&self, start_nanos: u64, duration_nanos: u64) {
        self.lock_stats().record(start_nanos, duration_nanos);
    }

    pub(crate) fn stats_snapshot(&self) -> TickStats {
        self.lock_stats().clone()
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, TickStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_slots_start_empty() {
        let h = ScheduleHandle::new(HandleTarget::Global, TickStats::new(0), WorkerId(2), 10);
        assert_eq!(h.owner(), Some(WorkerId(2)));
        assert_eq!(h.current_worker(), None);
        assert_eq!(h.pinned_to(), None);
        assert_eq!(h.region_id(), None);
        assert_eq!(h.next_start_nanos(), 10);
    }

    #[test]
    fn pin_and_run_state_round_trip_through_atomics() {
        let h = ScheduleHandle::new(HandleTarget::Global, TickStats::new(0), WorkerId(0), 0);
        h.set_pinned_to(Some(WorkerId(3)));
        h.set_running_on(Some(WorkerId(3)));
        assert!(h.is_pinned());
        assert_eq!(h.current_worker(), Some(WorkerId(3)));
        h.set_pinned_to(None);
        h.set_running_on(None);
        assert!(!h.is_pinned());
        assert_eq!(h.current_worker(), None);
    }

    #[test]
    fn failures_are_counted() {
        let h = ScheduleHandle::new(HandleTarget::Global, TickStats::new(0), WorkerId(0), 0);
        h.record_failure();
        h.record_failure();
        assert_eq!(h.tick_failures(), 2);
        h.cancel();
        assert!(h.is_cancelled());
    }
}
