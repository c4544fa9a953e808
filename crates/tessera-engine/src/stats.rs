//! Rolling tick statistics.
//!
//! Each [`TickHorizon`] is covered by a [`RollingWindow`] of ten equal
//! time segments. A segment keeps count, sum, extremes, and a log2
//! histogram with per-bucket sums, so recording is O(1) and a report is
//! O(segments × buckets) regardless of how many ticks the window holds.
//! Median and worst-5% are estimated from the histograms.

use std::fmt;

const SEGMENTS: usize = 10;
const BUCKETS: usize = 40;

// ── TickHorizon ────────────────────────────────────────────────────

/// Time span a [`TickReport`] covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TickHorizon {
    /// Last 5 seconds.
    Seconds5,
    /// Last 10 seconds.
    Seconds10,
    /// Last minute.
    Minutes1,
    /// Last 5 minutes.
    Minutes5,
    /// Last 15 minutes.
    Minutes15,
}

impl TickHorizon {
    /// Every horizon, shortest first.
    pub const ALL: [TickHorizon; 5] = [
        Self::Seconds5,
        Self::Seconds10,
        Self::Minutes1,
        Self::Minutes5,
        Self::Minutes15,
    ];

    /// Length of the horizon in nanoseconds.
    pub fn nanos(self) -> u64 {
        const SEC: u64 = 1_000_000_000;
        match self {
            Self::Seconds5 => 5 * SEC,
            Self::Seconds10 => 10 * SEC,
            Self::Minutes1 => 60 * SEC,
            Self::Minutes5 => 300 * SEC,
            Self::Minutes15 => 900 * SEC,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Seconds5 => 0,
            Self::Seconds10 => 1,
            Self::Minutes1 => 2,
            Self::Minutes5 => 3,
            Self::Minutes15 => 4,
        }
    }
}

impl fmt::Display for TickHorizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Seconds5 => "5s",
            Self::Seconds10 => "10s",
            Self::Minutes1 => "1m",
            Self::Minutes5 => "5m",
            Self::Minutes15 => "15m",
        };
        f.write_str(s)
    }
}

// ── TickReport ─────────────────────────────────────────────────────

/// Immutable snapshot of tick performance over one horizon.
#[derive(Clone, Debug, PartialEq)]
pub struct TickReport {
    /// Ticks per second.
    pub tick_rate: f64,
    /// Mean tick duration in nanoseconds.
    pub tick_duration_nanos_average: f64,
    /// Mean tick duration divided by the nominal tick interval.
    pub utilisation_fraction: f64,
    /// Mean duration of the slowest 5% of ticks, in nanoseconds.
    pub worst_5_percent_nanos_average: f64,
    /// Median tick duration in nanoseconds.
    pub median_nanos: f64,
    /// Shortest tick in nanoseconds.
    pub least_nanos: u64,
    /// Longest tick in nanoseconds.
    pub greatest_nanos: u64,
    /// Ticks in the window.
    pub tick_count: u64,
}

impl TickReport {
    /// The report of a window with no ticks yet: nominal rate, zero
    /// durations.
    pub fn nominal(tick_rate_hz: f64) -> Self {
        Self {
            tick_rate: tick_rate_hz,
            tick_duration_nanos_average: 0.0,
            utilisation_fraction: 0.0,
            worst_5_percent_nanos_average: 0.0,
            median_nanos: 0.0,
            least_nanos: 0,
            greatest_nanos: 0,
            tick_count: 0,
        }
    }

    /// Average several reports into one world-level report. Extremes take
    /// the overall min and max; counts add up.
    pub fn aggregate(reports: &[TickReport], tick_rate_hz: f64) -> TickReport {
        if reports.is_empty() {
            return Self::nominal(tick_rate_hz);
        }
        let n = reports.len() as f64;
        let mean = |f: fn(&TickReport) -> f64| reports.iter().map(f).sum::<f64>() / n;
        TickReport {
            tick_rate: mean(|r| r.tick_rate),
            tick_duration_nanos_average: mean(|r| r.tick_duration_nanos_average),
            utilisation_fraction: mean(|r| r.utilisation_fraction),
            worst_5_percent_nanos_average: mean(|r| r.worst_5_percent_nanos_average),
            median_nanos: mean(|r| r.median_nanos),
            least_nanos: reports.iter().map(|r| r.least_nanos).min().unwrap_or(0),
            greatest_nanos: reports.iter().map(|r| r.greatest_nanos).max().unwrap_or(0),
            tick_count: reports.iter().map(|r| r.tick_count).sum(),
        }
    }
}

// ── Segment ────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
struct Segment {
    /// Absolute segment number (`time / segment_nanos`) this slot holds.
    epoch: u64,
    count: u64,
    sum: u64,
    least: u64,
    greatest: u64,
    bucket_counts: [u32; BUCKETS],
    bucket_sums: [u64; BUCKETS],
}

impl Segment {
    const EMPTY: Segment = Segment {
        epoch: u64::MAX,
        count: 0,
        sum: 0,
        least: u64::MAX,
        greatest: 0,
        bucket_counts: [0; BUCKETS],
        bucket_sums: [0; BUCKETS],
    };
}

fn bucket_of(nanos: u64) -> usize {
    ((u64::BITS - nanos.leading_zeros()) as usize).min(BUCKETS - 1)
}

// ── RollingWindow ──────────────────────────────────────────────────

/// Tick durations recorded over one horizon.
#[derive(Clone)]
pub struct RollingWindow {
    segment_nanos: u64,
    segments: [Segment; SEGMENTS],
}

impl RollingWindow {
    /// An empty window covering `horizon`.
    pub fn new(horizon: TickHorizon) -> Self {
        Self {
            segment_nanos: horizon.nanos() / SEGMENTS as u64,
            segments: [Segment::EMPTY; SEGMENTS],
        }
    }

    /// Record a tick that started at `start_nanos` and took
    /// `duration_nanos`.
    pub fn record(&mut self, start_nanos: u64, duration_nanos: u64) {
        let epoch = start_nanos / self.segment_nanos;
        let seg = &mut self.segments[(epoch % SEGMENTS as u64) as usize];
        if seg.epoch != epoch {
            *seg = Segment { epoch, ..Segment::EMPTY };
        }
        seg.count += 1;
        seg.sum = seg.sum.saturating_add(duration_nanos);
        seg.least = seg.least.min(duration_nanos);
        seg.greatest = seg.greatest.max(duration_nanos);
        let b = bucket_of(duration_nanos);
        seg.bucket_counts[b] += 1;
        seg.bucket_sums[b] = seg.bucket_sums[b].saturating_add(duration_nanos);
    }

    /// Report over the window ending at `now_nanos`.
    ///
    /// `covered_nanos` bounds the span the rate is computed over, so a
    /// handle younger than the horizon is not under-reported.
    pub fn report(
        &self,
        now_nanos: u64,
        covered_nanos: u64,
        tick_interval_nanos: u64,
        tick_rate_hz: f64,
    ) -> TickReport {
        let now_epoch = now_nanos / self.segment_nanos;
        let oldest = now_epoch.saturating_sub(SEGMENTS as u64 - 1);

        let mut count = 0u64;
        let mut sum = 0u64;
        let mut least = u64::MAX;
        let mut greatest = 0u64;
        let mut counts = [0u64; BUCKETS];
        let mut sums = [0u64; BUCKETS];
        for seg in &self.segments {
            if seg.epoch == u64::MAX || seg.epoch < oldest || seg.epoch > now_epoch {
                continue;
            }
            count += seg.count;
            sum = sum.saturating_add(seg.sum);
            least = least.min(seg.least);
            greatest = greatest.max(seg.greatest);
            for b in 0..BUCKETS {
                counts[b] += u64::from(seg.bucket_counts[b]);
                sums[b] = sums[b].saturating_add(seg.bucket_sums[b]);
            }
        }
        if count == 0 {
            return TickReport::nominal(tick_rate_hz);
        }

        let span = covered_nanos
            .min(self.segment_nanos * SEGMENTS as u64)
            .max(1);
        let mean = sum as f64 / count as f64;
        TickReport {
            tick_rate: count as f64 * 1e9 / span as f64,
            tick_duration_nanos_average: mean,
            utilisation_fraction: mean / tick_interval_nanos.max(1) as f64,
            worst_5_percent_nanos_average: worst_fraction_average(&counts, &sums, count, 0.05),
            median_nanos: median(&counts, &sums, count),
            least_nanos: least,
            greatest_nanos: greatest,
            tick_count: count,
        }
    }
}

fn bucket_mean(counts: &[u64; BUCKETS], sums: &[u64; BUCKETS], b: usize) -> f64 {
    if counts[b] == 0 {
        0.0
    } else {
        sums[b] as f64 / counts[b] as f64
    }
}

/// Mean of the bucket holding the middle sample.
fn median(counts: &[u64; BUCKETS], sums: &[u64; BUCKETS], total: u64) -> f64 {
    let rank = total / 2;
    let mut seen = 0u64;
    for b in 0..BUCKETS {
        seen += counts[b];
        if seen > rank {
            return bucket_mean(counts, sums, b);
        }
    }
    0.0
}

/// Mean of the slowest `fraction` of samples, taking whole buckets from
/// the top and a bucket-mean share of the last one.
fn worst_fraction_average(
    counts: &[u64; BUCKETS],
    sums: &[u64; BUCKETS],
    total: u64,
    fraction: f64,
) -> f64 {
    let wanted = ((total as f64 * fraction).ceil() as u64).max(1);
    let mut taken = 0u64;
    let mut acc = 0.0;
    for b in (0..BUCKETS).rev() {
        if taken == wanted {
            break;
        }
        let take = counts[b].min(wanted - taken);
        if take == counts[b] {
            acc += sums[b] as f64;
        } else {
            acc += bucket_mean(counts, sums, b) * take as f64;
        }
        taken += take;
    }
    acc / taken.max(1) as f64
}

// ── TickStats ──────────────────────────────────────────────────────

/// One rolling window per [`TickHorizon`].
#[derive(Clone)]
pub struct TickStats {
    since_nanos: u64,
    windows: [RollingWindow; 5],
}

impl TickStats {
    /// Empty statistics whose coverage starts at `since_nanos`.
    pub fn new(since_nanos: u64) -> Self {
        Self {
            since_nanos,
            windows: TickHorizon::ALL.map(RollingWindow::new),
        }
    }

    /// Record one tick in every horizon.
    pub fn record(&mut self, start_nanos: u64, duration_nanos: u64) {
        for w in &mut self.windows {
            w.record(start_nanos, duration_nanos);
        }
    }

    /// Report for `horizon` at `now_nanos`.
    pub fn report(
        &self,
        horizon: TickHorizon,
        now_nanos: u64,
        tick_interval_nanos: u64,
        tick_rate_hz: f64,
    ) -> TickReport {
        let covered = now_nanos.saturating_sub(self.since_nanos);
        self.windows[horizon.index()].report(now_nanos, covered, tick_interval_nanos, tick_rate_hz)
    }
}

impl fmt::Debug for TickStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickStats")
            .field("since_nanos", &self.since_nanos)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: u64 = 1_000_000_000;
    const INTERVAL: u64 = 50_000_000;

    #[test]
    fn empty_window_reports_nominal_rate() {
        let stats = TickStats::new(0);
        let r = stats.report(TickHorizon::Seconds5, 3 * SEC, INTERVAL, 20.0);
        assert_eq!(r, TickReport::nominal(20.0));
    }

    #[test]
    fn steady_ticks_report_rate_and_utilisation() {
        let mut stats = TickStats::new(0);
        // 20 Hz for 5 seconds, 10ms each.
        for i in 0..100 {
            stats.record(i * INTERVAL, 10_000_000);
        }
        let r = stats.report(TickHorizon::Seconds5, 5 * SEC - 1, INTERVAL, 20.0);
        assert_eq!(r.tick_count, 100);
        assert!((r.tick_rate - 20.0).abs() < 0.1, "rate {}", r.tick_rate);
        assert!((r.tick_duration_nanos_average - 1e7).abs() < 1.0);
        assert!((r.utilisation_fraction - 0.2).abs() < 1e-9);
        assert_eq!(r.least_nanos, 10_000_000);
        assert_eq!(r.greatest_nanos, 10_000_000);
        assert!((r.median_nanos - 1e7).abs() < 1.0);
    }

    #[test]
    fn old_segments_fall_out_of_the_window() {
        let mut stats = TickStats::new(0);
        stats.record(0, 1_000);
        stats.record(20 * SEC, 2_000);
        let r = stats.report(TickHorizon::Seconds5, 20 * SEC, INTERVAL, 20.0);
        assert_eq!(r.tick_count, 1);
        assert_eq!(r.least_nanos, 2_000);
        let longer = stats.report(TickHorizon::Minutes1, 20 * SEC, INTERVAL, 20.0);
        assert_eq!(longer.tick_count, 2);
    }

    #[test]
    fn worst_five_percent_tracks_the_slow_tail() {
        let mut stats = TickStats::new(0);
        for i in 0..95 {
            stats.record(i * 1_000_000, 1_000);
        }
        for i in 95..100 {
            stats.record(i * 1_000_000, 1_000_000);
        }
        let r = stats.report(TickHorizon::Seconds5, SEC, INTERVAL, 20.0);
        assert!((r.worst_5_percent_nanos_average - 1e6).abs() < 1.0);
        assert!(r.median_nanos < 2_000.0);
        assert_eq!(r.greatest_nanos, 1_000_000);
    }

    #[test]
    fn aggregate_averages_and_takes_extremes() {
        let a = TickReport {
            tick_rate: 20.0,
            tick_duration_nanos_average: 100.0,
            utilisation_fraction: 0.1,
            worst_5_percent_nanos_average: 300.0,
            median_nanos: 90.0,
            least_nanos: 10,
            greatest_nanos: 400,
            tick_count: 50,
        };
        let b = TickReport {
            tick_rate: 10.0,
            tick_duration_nanos_average: 300.0,
            utilisation_fraction: 0.3,
            worst_5_percent_nanos_average: 500.0,
            median_nanos: 110.0,
            least_nanos: 5,
            greatest_nanos: 900,
            tick_count: 25,
        };
        let agg = TickReport::aggregate(&[a, b], 20.0);
        assert_eq!(agg.tick_rate, 15.0);
        assert_eq!(agg.tick_duration_nanos_average, 200.0);
        assert_eq!(agg.median_nanos, 100.0);
        assert_eq!(agg.least_nanos, 5);
        assert_eq!(agg.greatest_nanos, 900);
        assert_eq!(agg.tick_count, 75);
        assert_eq!(TickReport::aggregate(&[], 20.0), TickReport::nominal(20.0));
    }

    #[test]
    fn clone_keeps_history() {
        let mut stats = TickStats::new(0);
        stats.record(SEC, 5_000);
        let copy = stats.clone();
        let r = copy.report(TickHorizon::Seconds10, 2 * SEC, INTERVAL, 20.0);
        assert_eq!(r.tick_count, 1);
    }
}
