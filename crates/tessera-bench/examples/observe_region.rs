//! End-to-end observation example.
//!
//! Demonstrates: build a world → load cells → observe an area → bridge two
//! regions so the pin follows the merge → read reports → stop → shut down.
//!
//! Run with `RUST_LOG=tessera=debug` to see structural and pin events.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tessera_bench::{apply, churn_ops};
use tessera_core::CellPos;
use tessera_engine::{
    ObservationRequest, RegionTickContext, SchedulerConfig, TickError, TickHandler, TickHorizon,
    World, WorldConfig,
};
use tessera_region::DataRegistry;

/// Burns a little CPU per tick, proportional to the region's cell count.
struct Busy;

impl TickHandler for Busy {
    fn tick_region(&self, ctx: &mut RegionTickContext<'_>) -> Result<(), TickError> {
        let cells = ctx.region().cell_count();
        let mut acc = 0u64;
        for i in 0..cells * 200 {
            acc = acc.wrapping_mul(31).wrapping_add(i);
        }
        std::hint::black_box(acc);
        Ok(())
    }
}

fn main() {
    env_logger::init();
    println!("=== Tessera Observation Example ===\n");

    let config = WorldConfig {
        scheduler: SchedulerConfig {
            worker_count: Some(4),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut world = World::new(config, DataRegistry::empty(), Arc::new(Busy)).unwrap();

    apply(world.regionizer(), &churn_ops(4_000, 1_024, 42)).unwrap();
    world.add_cell(2_000, 0).unwrap();
    println!("Loaded {} regions", world.region_count());

    let worker = world
        .start_observation(ObservationRequest::Area {
            from: CellPos::new(1_950, 0),
            to: CellPos::new(1_955, 5),
        })
        .unwrap();
    println!(
        "Observing region {:?} on worker {worker}",
        world.observed_region()
    );

    // Bridge the observed region to the cell at x = 2000.
    for x in (1_956..2_000).step_by(8) {
        world.add_cell(x, 0).unwrap();
    }
    thread::sleep(Duration::from_millis(500));
    println!(
        "After bridging: observed region {:?}, tracked worker {:?}",
        world.observed_region(),
        world.tracked_worker()
    );

    let observed = world.tick_report(TickHorizon::Seconds5);
    println!(
        "Observed: {:.1} tps, mean {:.0}ns, median {:.0}ns, worst 5% {:.0}ns, util {:.3}",
        observed.tick_rate,
        observed.tick_duration_nanos_average,
        observed.median_nanos,
        observed.worst_5_percent_nanos_average,
        observed.utilisation_fraction
    );
    world.stop_observation().unwrap();

    let all = world.tick_report(TickHorizon::Seconds5);
    println!(
        "World: {:.1} tps average over {} ticks, longest {}ns",
        all.tick_rate, all.tick_count, all.greatest_nanos
    );

    let report = world.shutdown();
    println!(
        "\nShut down in {}ms, {} workers joined",
        report.total_ms, report.workers_joined
    );
}
