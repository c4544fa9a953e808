//! Bounds that every report must respect, whatever the tick history.

use proptest::prelude::*;
use tessera_engine::{TickHorizon, TickStats};

const INTERVAL: u64 = 50_000_000;

proptest! {
    #[test]
    fn report_estimates_stay_within_observed_extremes(
        durations in prop::collection::vec(1u64..2_000_000_000, 1..400),
    ) {
        let mut stats = TickStats::new(0);
        for (i, &d) in durations.iter().enumerate() {
            stats.record(i as u64 * 1_000_000, d);
        }
        let now = durations.len() as u64 * 1_000_000;
        let r = stats.report(TickHorizon::Seconds5, now, INTERVAL, 20.0);

        let least = *durations.iter().min().unwrap();
        let greatest = *durations.iter().max().unwrap();
        let mean = durations.iter().sum::<u64>() as f64 / durations.len() as f64;

        prop_assert_eq!(r.tick_count, durations.len() as u64);
        prop_assert_eq!(r.least_nanos, least);
        prop_assert_eq!(r.greatest_nanos, greatest);
        prop_assert!((r.tick_duration_nanos_average - mean).abs() <= mean * 1e-9 + 1e-6);
        prop_assert!(r.median_nanos >= least as f64 - 1e-6);
        prop_assert!(r.median_nanos <= greatest as f64 + 1e-6);
        prop_assert!(r.worst_5_percent_nanos_average <= greatest as f64 + 1e-6);
        prop_assert!(r.worst_5_percent_nanos_average >= mean * (1.0 - 1e-9));
        prop_assert!(r.tick_rate > 0.0);
    }
}
