//! Monotonic time source shared by the scheduler and statistics.

use std::sync::OnceLock;
use std::time::Instant;

/// Nanoseconds since the first call in this process.
///
/// Every timestamp the engine stores comes from here so that schedule
/// deadlines and statistics segments share one time base.
pub fn monotonic_nanos() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    Instant::now().duration_since(*epoch).as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_nanos_never_goes_backwards() {
        let a = monotonic_nanos();
        let b = monotonic_nanos();
        assert!(b >= a);
    }
}
