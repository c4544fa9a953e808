//! Region tick scheduler with pin-aware stealing.
//!
//! Each worker owns a queue of [`ScheduleHandle`]s. A worker takes the
//! earliest-due task that [`PinFilter`] allows from any queue, claims the
//! region (`Ready → Ticking`), drains its queued tasks, runs the tick
//! handler, records statistics, hands the region back to the regionizer,
//! and requeues the handle on its pinned worker or on itself.
//!
//! The scheduler also implements [`RegionHooks`]: the regionizer calls it
//! under the structural lock to create, retire, and re-home handles, and
//! to carry an active pin across merges and splits. Lock order is always
//! structural lock, then scheduler lock. Workers never call into the
//! regionizer while holding the scheduler lock.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use smallvec::SmallVec;

use tessera_core::{CellPos, FatalError, RegionId, WorkerId};
use tessera_region::{Region, RegionHooks, Regionizer, SplitLayout};

use crate::clock::monotonic_nanos;
use crate::config::SchedulerConfig;
use crate::error::TickError;
use crate::handle::{HandleTarget, ScheduleHandle};
use crate::pin::{PinFilter, TaskView};
use crate::stats::{TickHorizon, TickReport, TickStats};
use crate::tick::{GlobalTickContext, RegionTickContext, TickHandler};

const LOG: &str = "tessera::scheduler";

/// Longest a worker sleeps before re-scanning the queues.
const IDLE_WAIT_NANOS: u64 = 50_000_000;

/// Delay before retrying a region that was mid-restructure.
const TRANSIENT_RETRY_NANOS: u64 = 100_000;

// ── Pin record ─────────────────────────────────────────────────────

/// What the active pin binds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinTarget {
    /// A region, followed across merges and splits through the cell
    /// `anchor`.
    Region {
        /// Currently pinned region.
        region: RegionId,
        /// Cell whose owner inherits the pin on a split.
        anchor: CellPos,
    },
    /// The global tick.
    Global,
}

#[derive(Clone, Copy, Debug)]
struct PinRecord {
    target: PinTarget,
    worker: WorkerId,
}

// ── Scheduler state ────────────────────────────────────────────────

struct SchedState {
    queues: Vec<Vec<Arc<ScheduleHandle>>>,
    running_pinned: Vec<bool>,
    handles: IndexMap<RegionId, Arc<ScheduleHandle>>,
    pin: Option<PinRecord>,
    next_queue: usize,
    shutdown: bool,
}

impl SchedState {
    fn round_robin(&mut self) -> WorkerId {
        let w = self.next_queue;
        self.next_queue = (self.next_queue + 1) % self.queues.len();
        WorkerId(w as u32)
    }

    /// Remove `handle` from whichever queue holds it. Returns whether it
    /// was queued.
    fn dequeue(&mut self, handle: &Arc<ScheduleHandle>) -> bool {
        for queue in &mut self.queues {
            if let Some(idx) = queue.iter().position(|h| Arc::ptr_eq(h, handle)) {
                queue.swap_remove(idx);
                return true;
            }
        }
        false
    }

    fn enqueue(&mut self, handle: Arc<ScheduleHandle>, worker: WorkerId) {
        handle.set_owner(worker);
        self.queues[worker.index()].push(handle);
    }

    /// Move a queued handle to `worker`'s queue. A running handle is left
    /// alone: its worker requeues it on its pinned worker when done.
    fn rehome(&mut self, handle: &Arc<ScheduleHandle>, worker: WorkerId) {
        if self.dequeue(handle) {
            self.enqueue(Arc::clone(handle), worker);
        } else {
            handle.set_owner(worker);
        }
    }

    fn retire(&mut self, handle: &Arc<ScheduleHandle>) {
        handle.cancel();
        handle.set_pinned_to(None);
        self.dequeue(handle);
    }
}

enum Pick {
    Take(usize, usize),
    Wait(Duration),
}

// ── Scheduler ──────────────────────────────────────────────────────

/// Schedules every region of one world, and the global tick, onto a
/// fixed pool of workers.
pub struct Scheduler {
    config: SchedulerConfig,
    filter: PinFilter,
    state: Mutex<SchedState>,
    wake: Condvar,
    global: Arc<ScheduleHandle>,
    global_tick: AtomicU64,
}

// Compile-time assertion: Scheduler must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Scheduler>();
};

impl Scheduler {
    /// A scheduler for `config.resolved_worker_count()` workers. Worker
    /// threads are started separately with [`run_worker`].
    pub fn new(config: SchedulerConfig) -> Self {
        let workers = config.resolved_worker_count();
        let now = monotonic_nanos();
        let global = Arc::new(ScheduleHandle::new(
            HandleTarget::Global,
            TickStats::new(now),
            WorkerId(0),
            now,
        ));
        let mut queues = vec![Vec::new(); workers];
        queues[0].push(Arc::clone(&global));
        Self {
            filter: PinFilter::new(config.steal_threshold_nanos()),
            config,
            state: Mutex::new(SchedState {
                queues,
                running_pinned: vec![false; workers],
                handles: IndexMap::new(),
                pin: None,
                next_queue: 0,
                shutdown: false,
            }),
            wake: Condvar::new(),
            global,
            global_tick: AtomicU64::new(0),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Number of workers.
    pub fn worker_count(&self) -> usize {
        self.lock().queues.len()
    }

    /// Handle of region `id`.
    pub fn handle(&self, id: RegionId) -> Option<Arc<ScheduleHandle>> {
        self.lock().handles.get(&id).cloned()
    }

    /// Snapshot of every region handle.
    pub fn handles(&self) -> Vec<Arc<ScheduleHandle>> {
        self.lock().handles.values().cloned().collect()
    }

    /// Handle of the global tick.
    pub fn global_handle(&self) -> &Arc<ScheduleHandle> {
        &self.global
    }

    /// Completed global ticks.
    pub fn global_ticks(&self) -> u64 {
        self.global_tick.load(Ordering::Acquire)
    }

    /// Number of handles waiting in `worker`'s queue.
    pub fn queued_on(&self, worker: WorkerId) -> usize {
        self.lock()
            .queues
            .get(worker.index())
            .map_or(0, Vec::len)
    }

    /// The active pin, if any.
    pub fn pin_target(&self) -> Option<(PinTarget, WorkerId)> {
        self.lock().pin.map(|p| (p.target, p.worker))
    }

    /// Report for `handle` over `horizon`, now.
    pub fn report(&self, handle: &ScheduleHandle, horizon: TickHorizon) -> TickReport {
        handle.tick_report(
            horizon,
            monotonic_nanos(),
            self.config.tick_interval_nanos(),
            self.config.tick_rate_hz,
        )
    }

    // ── Pinning ────────────────────────────────────────────────────

    /// Pin `region` to the worker currently assigned to it.
    ///
    /// Must be called with the structural lock held (from inside
    /// [`Regionizer::with_region_at`]) so no merge or split can intervene.
    /// `anchor` is the cell the pin follows across splits.
    pub fn pin_region(
        &self,
        region: &Arc<Region>,
        anchor: CellPos,
    ) -> Result<(Arc<ScheduleHandle>, WorkerId), FatalError> {
        let mut st = self.lock();
        let id = region.id();
        let handle = st
            .handles
            .get(&id)
            .cloned()
            .ok_or(FatalError::MissingHandle { region: id })?;
        let worker = handle
            .current_worker()
            .or_else(|| handle.owner())
            .ok_or(FatalError::MissingWorker { region: id })?;
        handle.set_pinned_to(Some(worker));
        st.rehome(&handle, worker);
        st.pin = Some(PinRecord {
            target: PinTarget::Region { region: id, anchor },
            worker,
        });
        self.wake.notify_all();
        log::info!(target: "tessera::pin", "pinned region {id} to worker {worker}");
        Ok((handle, worker))
    }

    /// Pin the global tick to the worker currently assigned to it.
    pub fn pin_global(&self) -> Result<(Arc<ScheduleHandle>, WorkerId), FatalError> {
        let mut st = self.lock();
        let handle = Arc::clone(&self.global);
        let worker = handle
            .current_worker()
            .or_else(|| handle.owner())
            .ok_or(FatalError::MissingWorker { region: RegionId(0) })?;
        handle.set_pinned_to(Some(worker));
        st.rehome(&handle, worker);
        st.pin = Some(PinRecord {
            target: PinTarget::Global,
            worker,
        });
        self.wake.notify_all();
        log::info!(target: "tessera::pin", "pinned global tick to worker {worker}");
        Ok((handle, worker))
    }

    /// Release the active pin. Returns the handle it was attached to.
    pub fn unpin(&self) -> Option<Arc<ScheduleHandle>> {
        let mut st = self.lock();
        let record = st.pin.take()?;
        let handle = match record.target {
            PinTarget::Region { region, .. } => st.handles.get(&region).cloned(),
            PinTarget::Global => Some(Arc::clone(&self.global)),
        };
        if let Some(h) = &handle {
            h.set_pinned_to(None);
        }
        self.wake.notify_all();
        log::info!(target: "tessera::pin", "released pin on worker {}", record.worker);
        handle
    }

    // ── Worker side ────────────────────────────────────────────────

    /// Ask every worker to stop after its current tick.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.wake.notify_all();
    }

    /// Whether [`shutdown`](Self::shutdown) has been requested.
    pub fn is_shut_down(&self) -> bool {
        self.lock().shutdown
    }

    fn lock(&self) -> MutexGuard<'_, SchedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn select(&self, st: &SchedState, me: WorkerId, now: u64) -> Pick {
        let mut best: Option<((u64, bool), usize, usize)> = None;
        let mut wake_at = now.saturating_add(IDLE_WAIT_NANOS);
        for (q, queue) in st.queues.iter().enumerate() {
            let queue_worker = WorkerId(q as u32);
            for (i, handle) in queue.iter().enumerate() {
                let view = TaskView {
                    due_at: handle.next_start_nanos(),
                    queue: queue_worker,
                    pinned_to: handle.pinned_to(),
                    queue_running_pinned: st.running_pinned[q],
                };
                if self.filter.allows(&view, me, now) {
                    let key = (view.due_at, queue_worker != me);
                    if best.is_none_or(|(k, _, _)| key < k) {
                        best = Some((key, q, i));
                    }
                } else if let Some(at) = self.filter.earliest(&view, me) {
                    wake_at = wake_at.min(at);
                }
            }
        }
        match best {
            Some((_, q, i)) => Pick::Take(q, i),
            None => Pick::Wait(Duration::from_nanos(wake_at.saturating_sub(now).max(1_000))),
        }
    }

    /// Block until a task is allowed for `me`, or return `None` once the
    /// world shuts down or is poisoned.
    fn next_task(&self, me: WorkerId, regionizer: &Regionizer) -> Option<Arc<ScheduleHandle>> {
        let mut st = self.lock();
        loop {
            if st.shutdown || regionizer.is_poisoned() {
                return None;
            }
            match self.select(&st, me, monotonic_nanos()) {
                Pick::Take(q, i) => {
                    let handle = st.queues[q].swap_remove(i);
                    st.running_pinned[me.index()] = handle.is_pinned();
                    handle.set_running_on(Some(me));
                    return Some(handle);
                }
                Pick::Wait(d) => {
                    st = self
                        .wake
                        .wait_timeout(st, d)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    /// Put `handle` back after a run, due at `next`, or drop it if it was
    /// retired meanwhile.
    fn finish_run(&self, handle: &Arc<ScheduleHandle>, me: WorkerId, next: Option<u64>) {
        let mut st = self.lock();
        st.running_pinned[me.index()] = false;
        handle.set_running_on(None);
        if let Some(next) = next {
            if !handle.is_cancelled() {
                let worker = handle.pinned_to().unwrap_or(me);
                handle.set_next_start(next);
                st.enqueue(Arc::clone(handle), worker);
            }
        }
        self.wake.notify_all();
    }

    fn next_start_after(&self, handle: &ScheduleHandle, now: u64) -> u64 {
        handle
            .next_start_nanos()
            .saturating_add(self.config.tick_interval_nanos())
            .max(now)
    }
}

// ── RegionHooks ────────────────────────────────────────────────────

impl RegionHooks for Scheduler {
    fn on_create(&self, region: &Arc<Region>) -> Result<(), FatalError> {
        let mut st = self.lock();
        let now = monotonic_nanos();
        let worker = st.round_robin();
        let handle = Arc::new(ScheduleHandle::new(
            HandleTarget::Region(Arc::clone(region)),
            TickStats::new(now),
            worker,
            now,
        ));
        st.handles.insert(region.id(), Arc::clone(&handle));
        st.enqueue(handle, worker);
        self.wake.notify_all();
        Ok(())
    }

    fn on_merge(&self, from: &Arc<Region>, into: &Arc<Region>) -> Result<(), FatalError> {
        let mut st = self.lock();
        let from_handle = st
            .handles
            .swap_remove(&from.id())
            .ok_or(FatalError::MissingHandle { region: from.id() })?;
        let into_handle = st
            .handles
            .get(&into.id())
            .cloned()
            .ok_or(FatalError::MissingHandle { region: into.id() })?;
        st.retire(&from_handle);

        if let Some(PinRecord {
            target: PinTarget::Region { region, anchor },
            worker,
        }) = st.pin
        {
            if region == from.id() {
                into_handle.set_pinned_to(Some(worker));
                st.rehome(&into_handle, worker);
                st.pin = Some(PinRecord {
                    target: PinTarget::Region {
                        region: into.id(),
                        anchor,
                    },
                    worker,
                });
                log::info!(
                    target: "tessera::pin",
                    "pin moved from region {} to {} on merge",
                    from.id(),
                    into.id()
                );
            }
        }
        self.wake.notify_all();
        Ok(())
    }

    fn on_split(
        &self,
        from: &Arc<Region>,
        children: &[Arc<Region>],
        layout: &SplitLayout<'_>,
    ) -> Result<(), FatalError> {
        let mut st = self.lock();
        let parent = st
            .handles
            .swap_remove(&from.id())
            .ok_or(FatalError::MissingHandle { region: from.id() })?;
        st.retire(&parent);

        let stats = parent.stats_snapshot();
        let next_start = parent.next_start_nanos();
        let owner = parent.owner().unwrap_or(WorkerId(0));
        let mut child_handles: SmallVec<[Arc<ScheduleHandle>; 4]> = SmallVec::new();
        for child in children {
            let handle = Arc::new(ScheduleHandle::new(
                HandleTarget::Region(Arc::clone(child)),
                stats.clone(),
                owner,
                next_start,
            ));
            st.handles.insert(child.id(), Arc::clone(&handle));
            st.enqueue(Arc::clone(&handle), owner);
            child_handles.push(handle);
        }

        if let Some(PinRecord {
            target: PinTarget::Region { region, anchor },
            worker,
        }) = st.pin
        {
            if region == from.id() {
                let idx = layout
                    .child_of_cell(anchor.x, anchor.z)
                    .ok_or(FatalError::PinnedRegionDied { region })?;
                let handle = &child_handles[idx];
                handle.set_pinned_to(Some(worker));
                st.rehome(handle, worker);
                st.pin = Some(PinRecord {
                    target: PinTarget::Region {
                        region: children[idx].id(),
                        anchor,
                    },
                    worker,
                });
                log::info!(
                    target: "tessera::pin",
                    "pin moved from region {} to {} on split",
                    from.id(),
                    children[idx].id()
                );
            }
        }
        self.wake.notify_all();
        Ok(())
    }

    fn on_destroy(&self, region: &Arc<Region>) -> Result<(), FatalError> {
        let mut st = self.lock();
        if let Some(PinRecord {
            target: PinTarget::Region { region: pinned, .. },
            ..
        }) = st.pin
        {
            if pinned == region.id() {
                return Err(FatalError::PinnedRegionDied { region: pinned });
            }
        }
        let handle = st
            .handles
            .swap_remove(&region.id())
            .ok_or(FatalError::MissingHandle { region: region.id() })?;
        st.retire(&handle);
        Ok(())
    }
}

// ── Worker loop ────────────────────────────────────────────────────

/// Run worker `me` until the world shuts down or is poisoned.
pub fn run_worker(
    me: WorkerId,
    scheduler: &Scheduler,
    regionizer: &Regionizer,
    handler: &dyn TickHandler,
) {
    log::debug!(target: LOG, "worker {me} started");
    while let Some(handle) = scheduler.next_task(me, regionizer) {
        let next = match handle.target() {
            HandleTarget::Global => Some(run_global(me, scheduler, regionizer, handler, &handle)),
            HandleTarget::Region(region) => {
                let region = Arc::clone(region);
                run_region(me, scheduler, regionizer, handler, &handle, &region)
            }
        };
        scheduler.finish_run(&handle, me, next);
    }
    log::debug!(target: LOG, "worker {me} stopped");
}

fn run_global(
    me: WorkerId,
    scheduler: &Scheduler,
    regionizer: &Regionizer,
    handler: &dyn TickHandler,
    handle: &ScheduleHandle,
) -> u64 {
    let start = monotonic_nanos();
    let tick = scheduler.global_tick.load(Ordering::Acquire);
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut ctx = GlobalTickContext::new(regionizer, me, tick);
        handler.tick_global(&mut ctx)
    }));
    if let Err(e) = flatten(result) {
        log::warn!(target: LOG, "global tick {tick} on worker {me}: {e}");
        handle.record_failure();
    }
    scheduler.global_tick.fetch_add(1, Ordering::AcqRel);
    let end = monotonic_nanos();
    handle.record_tick(start, end - start);
    scheduler.next_start_after(handle, end)
}

/// Tick one region. Returns when the handle is next due, or `None` if it
/// must not be requeued.
fn run_region(
    me: WorkerId,
    scheduler: &Scheduler,
    regionizer: &Regionizer,
    handler: &dyn TickHandler,
    handle: &ScheduleHandle,
    region: &Arc<Region>,
) -> Option<u64> {
    if !region.try_begin_tick() {
        if handle.is_cancelled() {
            return None;
        }
        if region.is_dead() {
            regionizer.report_fatal(FatalError::DeadRegionScheduled { region: region.id() });
            return None;
        }
        // Mid-restructure; try again shortly.
        return Some(monotonic_nanos() + TRANSIENT_RETRY_NANOS);
    }

    let start = monotonic_nanos();
    let tasks = region.take_tasks();
    let result = {
        let mut data = region.data();
        for task in tasks {
            if catch_unwind(AssertUnwindSafe(|| task.run(&mut data))).is_err() {
                log::warn!(target: LOG, "task on region {} panicked", region.id());
            }
        }
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut ctx = RegionTickContext::new(region, &mut data, regionizer, me);
            handler.tick_region(&mut ctx)
        }));
        flatten(result)
    };
    if let Err(e) = result {
        log::warn!(
            target: LOG,
            "region {} tick {} on worker {me}: {e}",
            region.id(),
            region.tick()
        );
        handle.record_failure();
    }
    region.advance_tick();
    let end = monotonic_nanos();
    handle.record_tick(start, end - start);

    if let Err(e) = regionizer.release_region(region) {
        log::error!(target: LOG, "releasing region {}: {e}", region.id());
        return None;
    }
    Some(scheduler.next_start_after(handle, end))
}

fn flatten(result: std::thread::Result<Result<(), TickError>>) -> Result<(), TickError> {
    match result {
        Ok(r) => r,
        Err(payload) => Err(TickError::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::FatalPolicy;
    use tessera_region::{DataRegistry, RegionizerConfig};

    fn setup(workers: usize) -> (Arc<Scheduler>, Regionizer) {
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig {
            worker_count: Some(workers),
            ..Default::default()
        }));
        let config = RegionizerConfig {
            fatal_policy: FatalPolicy::Poison,
            ..Default::default()
        };
        let hooks: Arc<dyn RegionHooks> = Arc::clone(&scheduler) as Arc<dyn RegionHooks>;
        let regionizer = Regionizer::with_hooks(config, DataRegistry::empty(), hooks).unwrap();
        (scheduler, regionizer)
    }

    #[test]
    fn created_regions_get_round_robin_handles() {
        let (s, r) = setup(2);
        r.add_cell(0, 0).unwrap();
        r.add_cell(256, 0).unwrap();
        let a = s.handle(r.region_at(0, 0).unwrap().id()).unwrap();
        let b = s.handle(r.region_at(256, 0).unwrap().id()).unwrap();
        assert_eq!(a.owner(), Some(WorkerId(0)));
        assert_eq!(b.owner(), Some(WorkerId(1)));
        // Global handle plus one region on worker 0.
        assert_eq!(s.queued_on(WorkerId(0)), 2);
        assert_eq!(s.queued_on(WorkerId(1)), 1);
    }

    #[test]
    fn merge_retires_the_losing_handle() {
        let (s, r) = setup(2);
        r.add_cell(0, 0).unwrap();
        r.add_cell(64, 0).unwrap();
        r.add_cell(32, 0).unwrap();
        assert_eq!(s.handles().len(), 1);
        assert!(s.handle(RegionId(1)).is_some());
        assert!(s.handle(RegionId(2)).is_none());
    }

    #[test]
    fn pin_moves_handle_to_assigned_worker_and_unpin_clears_it() {
        let (s, r) = setup(3);
        r.add_cell(0, 0).unwrap();
        let (handle, worker) = r
            .with_region_at(0, 0, |g| s.pin_region(g.unwrap(), CellPos::new(0, 0)))
            .unwrap();
        assert_eq!(handle.pinned_to(), Some(worker));
        assert_eq!(handle.owner(), Some(worker));
        let released = s.unpin().unwrap();
        assert!(Arc::ptr_eq(&released, &handle));
        assert_eq!(handle.pinned_to(), None);
        assert!(s.unpin().is_none());
    }

    #[test]
    fn destroying_pinned_region_is_fatal() {
        let (s, r) = setup(1);
        r.add_cell(0, 0).unwrap();
        r.with_region_at(0, 0, |g| s.pin_region(g.unwrap(), CellPos::new(0, 0)))
            .unwrap();
        match r.remove_cell(0, 0) {
            Err(tessera_core::RegionizerError::Fatal(FatalError::PinnedRegionDied { .. })) => {}
            other => panic!("expected PinnedRegionDied, got {other:?}"),
        }
        assert!(r.is_poisoned());
    }

    #[test]
    fn select_waits_for_the_earliest_due_task() {
        let s = Scheduler::new(SchedulerConfig {
            worker_count: Some(1),
            ..Default::default()
        });
        let st = s.lock();
        let due = s.global.next_start_nanos();
        match s.select(&st, WorkerId(0), due) {
            Pick::Take(0, 0) => {}
            _ => panic!("expected the global handle to be taken"),
        }
        s.global.set_next_start(due + 10_000_000);
        match s.select(&st, WorkerId(0), due) {
            Pick::Wait(d) => assert_eq!(d, Duration::from_millis(10)),
            Pick::Take(..) => panic!("nothing is due yet"),
        }
    }

    #[test]
    fn panic_payloads_become_messages() {
        let r = catch_unwind(|| -> Result<(), TickError> { panic!("boom {}", 1) });
        assert_eq!(
            flatten(r),
            Err(TickError::Panicked {
                message: "boom 1".into()
            })
        );
    }
}
