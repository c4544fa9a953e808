//! Observation sessions: binding one region, or the global tick, to a
//! single worker for the duration of an external profiling run.
//!
//! A [`HandlePinner`] knows how to find and pin its target. The
//! [`AreaPinner`] loads every cell of a rectangle (holding a reference on
//! each so the region cannot die underneath it) and pins the region that
//! owns the rectangle's minimum corner. The [`GlobalPinner`] pins the
//! world-wide tick. [`ObservationControl`] allows at most one session at a
//! time.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tessera_core::{CellPos, FatalError, RegionId, WorkerId};
use tessera_region::Regionizer;

use crate::config::WorldBounds;
use crate::error::ObservationError;
use crate::handle::ScheduleHandle;
use crate::scheduler::Scheduler;

const LOG: &str = "tessera::pin";

/// Largest area an [`AreaPinner`] accepts, in cells.
pub const MAX_OBSERVED_CELLS: u64 = 512;

// ── PinContext ─────────────────────────────────────────────────────

/// The world services a pinner works against.
#[derive(Clone, Copy)]
pub struct PinContext<'a> {
    regionizer: &'a Regionizer,
    scheduler: &'a Scheduler,
    bounds: WorldBounds,
}

impl<'a> PinContext<'a> {
    /// Bundle the services of one world.
    pub fn new(regionizer: &'a Regionizer, scheduler: &'a Scheduler, bounds: WorldBounds) -> Self {
        Self {
            regionizer,
            scheduler,
            bounds,
        }
    }

    /// The world's regionizer.
    pub fn regionizer(&self) -> &'a Regionizer {
        self.regionizer
    }

    /// The world's scheduler.
    pub fn scheduler(&self) -> &'a Scheduler {
        self.scheduler
    }

    /// The world border.
    pub fn bounds(&self) -> WorldBounds {
        self.bounds
    }

    /// Record `err` with the regionizer's fatal policy.
    fn fatal(&self, err: FatalError) -> ObservationError {
        self.regionizer.report_fatal(err.clone());
        ObservationError::Fatal(err)
    }
}

// ── HandlePinner ───────────────────────────────────────────────────

/// Locates a schedule handle and binds it to one worker.
pub trait HandlePinner: Send {
    /// Short description for logs.
    fn name(&self) -> String;

    /// Establish the pin and call `on_ready` once affinity holds.
    fn pin(
        &mut self,
        ctx: &PinContext<'_>,
        on_ready: &mut dyn FnMut(&Arc<ScheduleHandle>, WorkerId),
    ) -> Result<(), ObservationError>;

    /// Remove the pin and call `on_done` with the handle it was on.
    fn unpin(
        &mut self,
        ctx: &PinContext<'_>,
        on_done: &mut dyn FnMut(&Arc<ScheduleHandle>),
    ) -> Result<(), ObservationError>;
}

// ── AreaPinner ─────────────────────────────────────────────────────

/// Pins the region owning a rectangle of cells.
#[derive(Debug)]
pub struct AreaPinner {
    min: CellPos,
    max: CellPos,
    from: CellPos,
    to: CellPos,
    loaded: Vec<CellPos>,
}

impl AreaPinner {
    /// A pinner for the rectangle with opposite corners `from` and `to`,
    /// inclusive, in any order.
    pub fn new(from: CellPos, to: CellPos) -> Self {
        Self {
            min: CellPos::new(from.x.min(to.x), from.z.min(to.z)),
            max: CellPos::new(from.x.max(to.x), from.z.max(to.z)),
            from,
            to,
            loaded: Vec::new(),
        }
    }

    /// Number of cells in the rectangle.
    pub fn cell_count(&self) -> u64 {
        let w = (i64::from(self.max.x) - i64::from(self.min.x) + 1) as u64;
        let h = (i64::from(self.max.z) - i64::from(self.min.z) + 1) as u64;
        w * h
    }

    /// Cell the pin follows across splits.
    pub fn anchor(&self) -> CellPos {
        self.min
    }

    /// Reject areas outside the border or above the ceiling.
    pub fn validate(&self, bounds: &WorldBounds) -> Result<(), ObservationError> {
        if !bounds.contains(self.min) || !bounds.contains(self.max) {
            return Err(ObservationError::OutOfWorld {
                from: self.from,
                to: self.to,
            });
        }
        let requested = self.cell_count();
        if requested > MAX_OBSERVED_CELLS {
            return Err(ObservationError::TooManyCells {
                ceiling: MAX_OBSERVED_CELLS,
                requested,
            });
        }
        Ok(())
    }

    fn release_cells(&mut self, regionizer: &Regionizer) -> Result<(), ObservationError> {
        let mut first_err = None;
        for cell in self.loaded.drain(..) {
            if let Err(e) = regionizer.remove_cell(cell.x, cell.z) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl HandlePinner for AreaPinner {
    fn name(&self) -> String {
        format!("area {}..{}", self.min, self.max)
    }

    fn pin(
        &mut self,
        ctx: &PinContext<'_>,
        on_ready: &mut dyn FnMut(&Arc<ScheduleHandle>, WorkerId),
    ) -> Result<(), ObservationError> {
        self.validate(&ctx.bounds)?;
        let regionizer = ctx.regionizer;
        for x in self.min.x..=self.max.x {
            for z in self.min.z..=self.max.z {
                if let Err(e) = regionizer.add_cell(x, z) {
                    if let Err(release) = self.release_cells(regionizer) {
                        log::warn!(
                            target: LOG,
                            "releasing cells of {} after a failed load: {release}",
                            self.name()
                        );
                    }
                    return Err(e.into());
                }
                self.loaded.push(CellPos::new(x, z));
            }
        }

        let anchor = self.anchor();
        let pinned = regionizer.with_region_at(anchor.x, anchor.z, |region| match region {
            Some(region) => ctx.scheduler.pin_region(region, anchor),
            None => Err(FatalError::MissingRegion {
                x: anchor.x,
                z: anchor.z,
            }),
        });
        match pinned {
            Ok((handle, worker)) => {
                on_ready(&handle, worker);
                Ok(())
            }
            Err(e) => Err(ctx.fatal(e)),
        }
    }

    fn unpin(
        &mut self,
        ctx: &PinContext<'_>,
        on_done: &mut dyn FnMut(&Arc<ScheduleHandle>),
    ) -> Result<(), ObservationError> {
        if let Some(handle) = ctx.scheduler.unpin() {
            on_done(&handle);
        }
        self.release_cells(ctx.regionizer)
    }
}

// ── GlobalPinner ───────────────────────────────────────────────────

/// Pins the world-wide tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct GlobalPinner;

impl HandlePinner for GlobalPinner {
    fn name(&self) -> String {
        "global".to_string()
    }

    fn pin(
        &mut self,
        ctx: &PinContext<'_>,
        on_ready: &mut dyn FnMut(&Arc<ScheduleHandle>, WorkerId),
    ) -> Result<(), ObservationError> {
        let (handle, worker) = ctx.scheduler.pin_global().map_err(|e| ctx.fatal(e))?;
        on_ready(&handle, worker);
        Ok(())
    }

    fn unpin(
        &mut self,
        ctx: &PinContext<'_>,
        on_done: &mut dyn FnMut(&Arc<ScheduleHandle>),
    ) -> Result<(), ObservationError> {
        if let Some(handle) = ctx.scheduler.unpin() {
            on_done(&handle);
        }
        Ok(())
    }
}

// ── ObservationMode ────────────────────────────────────────────────

/// Observation mode named by an external command layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObservationMode {
    /// Observe the world-wide tick.
    Global,
    /// Observe the region owning an area.
    Area,
}

impl FromStr for ObservationMode {
    type Err = ObservationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            "area" => Ok(Self::Area),
            other => Err(ObservationError::UnknownMode {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ObservationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Area => f.write_str("area"),
        }
    }
}

/// Strip the trailing `#<n>` ordinal from a worker thread name so that
/// every worker of a pool groups under one name.
pub fn thread_group_name(thread_name: &str) -> &str {
    match thread_name.rfind('#') {
        Some(idx)
            if idx + 1 < thread_name.len()
                && thread_name[idx + 1..].bytes().all(|b| b.is_ascii_digit()) =>
        {
            &thread_name[..idx]
        }
        _ => thread_name,
    }
}

// ── ObservationControl ─────────────────────────────────────────────

struct Session {
    pinner: Box<dyn HandlePinner>,
    handle: Arc<ScheduleHandle>,
    worker: WorkerId,
}

/// At most one active observation session.
#[derive(Default)]
pub struct ObservationControl {
    session: Mutex<Option<Session>>,
}

impl ObservationControl {
    /// No session active.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session with `pinner`. Fails with
    /// [`ObservationError::AlreadyObserving`] if one is running.
    pub fn start(
        &self,
        ctx: &PinContext<'_>,
        mut pinner: Box<dyn HandlePinner>,
    ) -> Result<WorkerId, ObservationError> {
        let mut session = self.lock();
        if session.is_some() {
            return Err(ObservationError::AlreadyObserving);
        }
        let mut ready = None;
        pinner.pin(ctx, &mut |handle: &Arc<ScheduleHandle>, worker: WorkerId| {
            ready = Some((Arc::clone(handle), worker));
        })?;
        let Some((handle, worker)) = ready else {
            return Err(ObservationError::NotObserving);
        };
        log::info!(target: LOG, "observation of {} started on worker {worker}", pinner.name());
        *session = Some(Session {
            pinner,
            handle,
            worker,
        });
        Ok(worker)
    }

    /// Stop the running session. Fails with
    /// [`ObservationError::NotObserving`] if there is none.
    pub fn stop(&self, ctx: &PinContext<'_>) -> Result<(), ObservationError> {
        let mut session = self.lock();
        let Some(mut active) = session.take() else {
            return Err(ObservationError::NotObserving);
        };
        let mut done = false;
        let result = active
            .pinner
            .unpin(ctx, &mut |_: &Arc<ScheduleHandle>| done = true);
        log::info!(
            target: LOG,
            "observation of {} stopped (handle released: {done})",
            active.pinner.name()
        );
        result
    }

    /// Whether a session is running.
    pub fn is_observing(&self) -> bool {
        self.lock().is_some()
    }

    /// Worker bound by the running session, for restricting a sampling
    /// profiler to that thread.
    pub fn tracked_worker(&self) -> Option<WorkerId> {
        self.lock()
            .as_ref()
            .map(|s| s.handle.pinned_to().unwrap_or(s.worker))
    }

    /// Handle currently observed. Follows the pin across merges and
    /// splits.
    pub fn observed_handle(&self, scheduler: &Scheduler) -> Option<Arc<ScheduleHandle>> {
        let session = self.lock();
        let active = session.as_ref()?;
        match scheduler.pin_target() {
            Some((crate::scheduler::PinTarget::Region { region, .. }, _)) => scheduler.handle(region),
            Some((crate::scheduler::PinTarget::Global, _)) => Some(Arc::clone(scheduler.global_handle())),
            None => Some(Arc::clone(&active.handle)),
        }
    }

    /// Region currently observed, or `None` for a global session.
    pub fn observed_region(&self, scheduler: &Scheduler) -> Option<RegionId> {
        self.observed_handle(scheduler)?.region_id()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ObservationControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationControl")
            .field("observing", &self.is_observing())
            .field("tracked_worker", &self.tracked_worker())
            .finish()
    }
}
