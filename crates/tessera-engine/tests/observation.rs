//! Observation sessions: validation, pin affinity, pin transfer across
//! merges and splits, and the fatal path when a pinned region dies.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tessera_core::{CellPos, FatalError, FatalPolicy, RegionId, RegionizerError, WorkerId};
use tessera_engine::{
    ObservationError, ObservationRequest, PinTarget, RegionTickContext, Scheduler, SchedulerConfig,
    TickError, TickHandler, TickHorizon, World, WorldConfig,
};
use tessera_region::{RegionHooks, Regionizer, RegionizerConfig};
use tessera_test_utils::Fixtures;

fn config(workers: usize) -> WorldConfig {
    WorldConfig {
        regionizer: RegionizerConfig {
            fatal_policy: FatalPolicy::Poison,
            ..Default::default()
        },
        scheduler: SchedulerConfig {
            worker_count: Some(workers),
            tick_rate_hz: 200.0,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

/// Records which worker ran each region tick.
#[derive(Default)]
struct Recorder {
    runs: Mutex<Vec<(RegionId, WorkerId)>>,
}

impl TickHandler for Recorder {
    fn tick_region(&self, ctx: &mut RegionTickContext<'_>) -> Result<(), TickError> {
        self.runs
            .lock()
            .unwrap()
            .push((ctx.region().id(), ctx.worker()));
        Ok(())
    }
}

fn world(workers: usize) -> (World, Arc<Recorder>) {
    let fx = Fixtures::new();
    let recorder = Arc::new(Recorder::default());
    let world = World::new(config(workers), fx.registry, recorder.clone()).unwrap();
    (world, recorder)
}

fn area(x0: i32, z0: i32, x1: i32, z1: i32) -> ObservationRequest {
    ObservationRequest::Area {
        from: CellPos::new(x0, z0),
        to: CellPos::new(x1, z1),
    }
}

#[test]
fn oversized_area_is_rejected_with_ceiling_and_count() {
    let (world, _) = world(1);
    let err = world.start_observation(area(0, 0, 22, 22)).unwrap_err();
    assert_eq!(
        err,
        ObservationError::TooManyCells {
            ceiling: 512,
            requested: 529
        }
    );
    let msg = err.to_string();
    assert!(msg.contains("512") && msg.contains("529"), "{msg}");
    assert_eq!(world.region_count(), 0);
    assert!(!world.observation().is_observing());
}

#[test]
fn area_outside_world_is_rejected() {
    let (world, _) = world(1);
    match world.start_observation(area(-1_875_000, 0, -1_874_990, 3)) {
        Err(ObservationError::OutOfWorld { .. }) => {}
        other => panic!("expected OutOfWorld, got {other:?}"),
    }
    assert_eq!(world.region_count(), 0);
}

#[test]
fn poisoned_world_rejects_area_session_and_stays_idle() {
    let (world, _) = world(1);
    world.regionizer().report_fatal(FatalError::MissingRegion { x: 0, z: 0 });
    match world.start_observation(area(0, 0, 1, 1)) {
        Err(ObservationError::Regionizer(RegionizerError::Poisoned(_))) => {}
        other => panic!("expected Poisoned, got {other:?}"),
    }
    assert!(!world.observation().is_observing());
    assert_eq!(world.region_count(), 0);
}

#[test]
fn second_session_is_busy_and_stop_without_session_fails() {
    let (world, _) = world(2);
    world.start_observation(ObservationRequest::Global).unwrap();
    assert_eq!(
        world.start_observation(area(0, 0, 3, 3)),
        Err(ObservationError::AlreadyObserving)
    );
    world.stop_observation().unwrap();
    assert_eq!(world.stop_observation(), Err(ObservationError::NotObserving));
}

#[test]
fn area_session_pins_region_to_tracked_worker() {
    let (world, recorder) = world(4);
    let worker = world.start_observation(area(0, 0, 3, 3)).unwrap();
    assert_eq!(world.tracked_worker(), Some(worker));

    let region = world.region_at(0, 0).unwrap();
    assert_eq!(world.observed_region(), Some(region.id()));
    let handle = world.handle_of(region.id()).unwrap();
    assert_eq!(handle.pinned_to(), Some(worker));

    // A tick already in flight when the pin landed may finish elsewhere.
    let start = region.tick();
    wait_until("settle", || region.tick() >= start + 2);
    recorder.runs.lock().unwrap().clear();
    let settled = region.tick();
    wait_until("pinned ticks", || region.tick() >= settled + 10);

    let runs = recorder.runs.lock().unwrap().clone();
    let on_region: Vec<_> = runs.iter().filter(|(id, _)| *id == region.id()).collect();
    assert!(!on_region.is_empty());
    assert!(on_region.iter().all(|(_, w)| *w == worker), "{on_region:?}");

    let report = world.tick_report(TickHorizon::Seconds5);
    assert!(report.tick_count > 0);

    world.stop_observation().unwrap();
    assert_eq!(handle.pinned_to(), None);
    assert_eq!(world.tracked_worker(), None);
    // The session's cell references are gone.
    assert!(!world.regionizer().contains_cell(0, 0));
}

#[test]
fn global_session_pins_the_global_handle() {
    let (world, _) = world(2);
    let worker = world.start_observation(ObservationRequest::Global).unwrap();
    assert_eq!(world.global_handle().pinned_to(), Some(worker));
    assert_eq!(world.observed_region(), None);
    world.stop_observation().unwrap();
    assert_eq!(world.global_handle().pinned_to(), None);
}

#[test]
fn pin_follows_merge_into_the_surviving_region() {
    let (world, _) = world(3);
    world.add_cell(64, 0).unwrap();
    let survivor = world.region_at(64, 0).unwrap().id();
    let worker = world.start_observation(area(0, 0, 1, 1)).unwrap();
    let pinned = world.observed_region().unwrap();
    assert!(pinned > survivor);

    world.add_cell(32, 0).unwrap();
    wait_until("merge", || world.region_count() == 1);

    assert_eq!(world.observed_region(), Some(survivor));
    assert_eq!(world.tracked_worker(), Some(worker));
    assert_eq!(world.handle_of(survivor).unwrap().pinned_to(), Some(worker));
    world.stop_observation().unwrap();
}

#[test]
fn destroying_the_pinned_region_poisons_the_world() {
    let (world, _) = world(2);
    world.start_observation(area(0, 0, 1, 1)).unwrap();
    for x in 0..=1 {
        for z in 0..=1 {
            // The last removal reports the fatal error, or defers it to the
            // end of an in-flight tick.
            let _ = world.remove_cell(x, z);
        }
    }
    wait_until("poison", || world.is_poisoned());
    match world.poison() {
        Some(FatalError::PinnedRegionDied { .. }) => {}
        other => panic!("expected PinnedRegionDied, got {other:?}"),
    }
}

// ── Without threads ────────────────────────────────────────────────

fn structural(max_dead: f64) -> (Arc<Scheduler>, Regionizer) {
    let scheduler = Arc::new(Scheduler::new(SchedulerConfig {
        worker_count: Some(3),
        ..Default::default()
    }));
    let config = RegionizerConfig {
        max_dead_section_percent: max_dead,
        fatal_policy: FatalPolicy::Poison,
        ..Default::default()
    };
    let fx = Fixtures::new();
    let hooks = Arc::clone(&scheduler) as Arc<dyn RegionHooks>;
    let regionizer = Regionizer::with_hooks(config, fx.registry, hooks).unwrap();
    (scheduler, regionizer)
}

#[test]
fn pin_transfers_atomically_on_merge() {
    let (s, r) = structural(0.2);
    r.add_cell(64, 0).unwrap();
    r.add_cell(0, 0).unwrap();
    let anchor = CellPos::new(0, 0);
    let (_, worker) = r
        .with_region_at(0, 0, |g| s.pin_region(g.unwrap(), anchor))
        .unwrap();
    assert_eq!(
        s.pin_target(),
        Some((PinTarget::Region { region: RegionId(2), anchor }, worker))
    );

    r.add_cell(32, 0).unwrap();

    assert_eq!(
        s.pin_target(),
        Some((PinTarget::Region { region: RegionId(1), anchor }, worker))
    );
    let survivor = s.handle(RegionId(1)).unwrap();
    assert_eq!(survivor.pinned_to(), Some(worker));
    assert_eq!(survivor.owner(), Some(worker));
    assert!(s.handle(RegionId(2)).is_none());
}

#[test]
fn pin_follows_anchor_cell_on_split() {
    let (s, r) = structural(0.1);
    for (x, z) in [(0, 0), (64, 0), (32, 0)] {
        r.add_cell(x, z).unwrap();
    }
    let anchor = CellPos::new(64, 0);
    let (_, worker) = r
        .with_region_at(64, 0, |g| s.pin_region(g.unwrap(), anchor))
        .unwrap();

    r.remove_cell(32, 0).unwrap();
    assert_eq!(r.region_count(), 2);

    let holder = r.region_at(64, 0).unwrap().id();
    let other = r.region_at(0, 0).unwrap().id();
    assert_eq!(
        s.pin_target(),
        Some((PinTarget::Region { region: holder, anchor }, worker))
    );
    assert_eq!(s.handle(holder).unwrap().pinned_to(), Some(worker));
    assert_eq!(s.handle(other).unwrap().pinned_to(), None);
}
