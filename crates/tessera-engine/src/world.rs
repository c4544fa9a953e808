//! The world: a regionizer, its scheduler, the worker threads, and the
//! observation control, started and stopped together.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tessera_core::{CellPos, FatalError, RegionId, RegionizerError, WorkerId};
use tessera_region::{DataRegistry, Region, RegionData, RegionHooks, Regionizer};

use crate::config::{ConfigError, WorldConfig};
use crate::error::{ObservationError, QueryError};
use crate::handle::ScheduleHandle;
use crate::observe::{AreaPinner, GlobalPinner, HandlePinner, ObservationControl, PinContext};
use crate::scheduler::{run_worker, Scheduler};
use crate::stats::{TickHorizon, TickReport};
use crate::tick::TickHandler;

const LOG: &str = "tessera::scheduler";

// ── ShutdownReport ─────────────────────────────────────────────────

/// Report from [`World::shutdown`].
#[derive(Debug)]
pub struct ShutdownReport {
    /// Total time spent shutting down.
    pub total_ms: u64,
    /// Number of worker threads joined.
    pub workers_joined: usize,
    /// Number of worker threads that had panicked.
    pub workers_panicked: usize,
    /// Regions whose deferred merges were resolved after the join.
    pub regions_settled: usize,
}

// ── ObservationRequest ─────────────────────────────────────────────

/// What to observe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObservationRequest {
    /// The world-wide tick.
    Global,
    /// The region owning the rectangle with these opposite corners.
    Area {
        /// First corner.
        from: CellPos,
        /// Opposite corner.
        to: CellPos,
    },
}

// ── World ──────────────────────────────────────────────────────────

/// One simulated world.
pub struct World {
    config: WorldConfig,
    regionizer: Arc<Regionizer>,
    scheduler: Arc<Scheduler>,
    observation: ObservationControl,
    workers: Vec<JoinHandle<()>>,
    shut_down: bool,
}

impl World {
    /// Validate `config`, build the regionizer and scheduler, and start
    /// the worker threads.
    pub fn new(
        config: WorldConfig,
        registry: Arc<DataRegistry>,
        handler: Arc<dyn TickHandler>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let scheduler = Arc::new(Scheduler::new(config.scheduler.clone()));
        let hooks: Arc<dyn RegionHooks> = Arc::clone(&scheduler) as Arc<dyn RegionHooks>;
        let regionizer = Arc::new(Regionizer::with_hooks(
            config.regionizer.clone(),
            registry,
            hooks,
        )?);

        let mut world = Self {
            config,
            regionizer,
            scheduler,
            observation: ObservationControl::new(),
            workers: Vec::new(),
            shut_down: false,
        };
        let count = world.scheduler.worker_count();
        for i in 0..count {
            let me = WorkerId(i as u32);
            let scheduler = Arc::clone(&world.scheduler);
            let regionizer = Arc::clone(&world.regionizer);
            let handler = Arc::clone(&handler);
            let spawned = thread::Builder::new()
                .name(format!("tessera-region-worker-{me}"))
                .spawn(move || run_worker(me, &scheduler, &regionizer, handler.as_ref()));
            match spawned {
                Ok(handle) => world.workers.push(handle),
                Err(e) => {
                    world.shutdown();
                    return Err(ConfigError::ThreadSpawnFailed {
                        reason: format!("region worker {me}: {e}"),
                    });
                }
            }
        }
        log::info!(target: LOG, "world started with {count} workers");
        Ok(world)
    }

    /// Active configuration.
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// The world's regionizer.
    pub fn regionizer(&self) -> &Arc<Regionizer> {
        &self.regionizer
    }

    /// The world's scheduler.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    // ── Cells and regions ──────────────────────────────────────────

    /// See [`Regionizer::add_cell`].
    pub fn add_cell(&self, x: i32, z: i32) -> Result<(), RegionizerError> {
        self.regionizer.add_cell(x, z)
    }

    /// See [`Regionizer::remove_cell`].
    pub fn remove_cell(&self, x: i32, z: i32) -> Result<(), RegionizerError> {
        self.regionizer.remove_cell(x, z)
    }

    /// Region owning cell `(x, z)`.
    pub fn region_at(&self, x: i32, z: i32) -> Option<Arc<Region>> {
        self.regionizer.region_at(x, z)
    }

    /// Number of live regions.
    pub fn region_count(&self) -> usize {
        self.regionizer.region_count()
    }

    /// Schedule handle of region `id`.
    pub fn handle_of(&self, id: RegionId) -> Option<Arc<ScheduleHandle>> {
        self.scheduler.handle(id)
    }

    /// Schedule handle of the global tick.
    pub fn global_handle(&self) -> &Arc<ScheduleHandle> {
        self.scheduler.global_handle()
    }

    /// Whether a fatal error has poisoned the world.
    pub fn is_poisoned(&self) -> bool {
        self.regionizer.is_poisoned()
    }

    /// The fatal error that poisoned the world, if any.
    pub fn poison(&self) -> Option<FatalError> {
        self.regionizer.poison()
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Run `f` on the data of the region owning `(x, z)`, on that region's
    /// tick thread at the start of its next tick, and wait for the result
    /// for at most the configured query timeout.
    pub fn query_region<R, F>(&self, x: i32, z: i32, f: F) -> Result<R, QueryError>
    where
        R: Send + 'static,
        F: FnOnce(&mut RegionData) -> R + Send + 'static,
    {
        if let Some(e) = self.regionizer.poison() {
            return Err(QueryError::Poisoned(e));
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.regionizer.queue_task(x, z, move |data| {
            // The caller may have given up already.
            let _ = tx.send(f(data));
        })?;
        let timeout = self.config.scheduler.query_timeout();
        let start = Instant::now();
        match rx.recv_timeout(timeout) {
            Ok(r) => Ok(r),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(QueryError::Timeout {
                waited: start.elapsed(),
            }),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(QueryError::Dropped),
        }
    }

    // ── Reporting ──────────────────────────────────────────────────

    /// Report of the region owning `(x, z)`.
    pub fn region_report(&self, x: i32, z: i32, horizon: TickHorizon) -> Option<TickReport> {
        let region = self.regionizer.region_at(x, z)?;
        let handle = self.scheduler.handle(region.id())?;
        Some(self.scheduler.report(&handle, horizon))
    }

    /// Report of the global tick.
    pub fn global_report(&self, horizon: TickHorizon) -> TickReport {
        self.scheduler.report(self.scheduler.global_handle(), horizon)
    }

    /// World-level report: the average over every region, or only the
    /// observed region while an area observation is running.
    pub fn tick_report(&self, horizon: TickHorizon) -> TickReport {
        let handles = match self.observation.observed_handle(&self.scheduler) {
            Some(h) if h.region_id().is_some() => vec![h],
            _ => self.scheduler.handles(),
        };
        let reports: Vec<TickReport> = handles
            .iter()
            .map(|h| self.scheduler.report(h, horizon))
            .collect();
        TickReport::aggregate(&reports, self.config.scheduler.tick_rate_hz)
    }

    // ── Observation ────────────────────────────────────────────────

    /// Start an observation session. Returns the worker now bound to it.
    pub fn start_observation(&self, request: ObservationRequest) -> Result<WorkerId, ObservationError> {
        let pinner: Box<dyn HandlePinner> = match request {
            ObservationRequest::Global => Box::new(GlobalPinner),
            ObservationRequest::Area { from, to } => {
                let pinner = AreaPinner::new(from, to);
                pinner.validate(&self.config.bounds)?;
                Box::new(pinner)
            }
        };
        self.observation.start(&self.pin_context(), pinner)
    }

    /// Stop the running observation session.
    pub fn stop_observation(&self) -> Result<(), ObservationError> {
        self.observation.stop(&self.pin_context())
    }

    /// The observation control.
    pub fn observation(&self) -> &ObservationControl {
        &self.observation
    }

    /// Worker bound by the running session.
    pub fn tracked_worker(&self) -> Option<WorkerId> {
        self.observation.tracked_worker()
    }

    /// Region observed by the running area session.
    pub fn observed_region(&self) -> Option<RegionId> {
        self.observation.observed_region(&self.scheduler)
    }

    fn pin_context(&self) -> PinContext<'_> {
        PinContext::new(&self.regionizer, &self.scheduler, self.config.bounds)
    }

    // ── Shutdown ───────────────────────────────────────────────────

    /// Stop and join every worker, then resolve any merge still deferred
    /// so the region set is maximal again. Idempotent.
    pub fn shutdown(&mut self) -> ShutdownReport {
        if self.shut_down {
            return ShutdownReport {
                total_ms: 0,
                workers_joined: 0,
                workers_panicked: 0,
                regions_settled: 0,
            };
        }
        let start = Instant::now();
        self.shut_down = true;
        self.scheduler.shutdown();

        let mut workers_joined = 0;
        let mut workers_panicked = 0;
        for handle in self.workers.drain(..) {
            match handle.join() {
                Ok(()) => workers_joined += 1,
                Err(_) => workers_panicked += 1,
            }
        }
        // No region ticks past this point, so every deferred merge can run.
        let regions_settled = if self.regionizer.is_poisoned() {
            0
        } else {
            match self.regionizer.settle() {
                Ok(n) => n,
                Err(e) => {
                    log::error!(target: LOG, "settling deferred merges at shutdown: {e}");
                    0
                }
            }
        };
        let total_ms = start.elapsed().as_millis() as u64;
        log::info!(target: LOG, "world shut down in {total_ms}ms ({workers_joined} workers joined)");
        ShutdownReport {
            total_ms,
            workers_joined,
            workers_panicked,
            regions_settled,
        }
    }
}

impl Drop for World {
    fn drop(&mut self) {
        if !self.shut_down {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("regions", &self.regionizer.region_count())
            .field("workers", &self.workers.len())
            .field("observation", &self.observation)
            .field("shut_down", &self.shut_down)
            .finish()
    }
}
