//! Per-process monotonic timestamps for entry ordering.
//!
//! `(created_at, id)` must be a total order that matches insertion order
//! even when the wall clock stalls within a millisecond or steps backwards,
//! so entry timestamps come from a clock that never repeats a millisecond.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

static LAST_TIMESTAMP_MS: AtomicI64 = AtomicI64::new(0);

/// Now, at millisecond precision, strictly greater than any previously
/// issued timestamp from this process.
pub fn monotonic_now() -> DateTime<Utc> {
    let now_ms = Utc::now().timestamp_millis();
    let mut last = LAST_TIMESTAMP_MS.load(Ordering::Relaxed);
    loop {
        let next = now_ms.max(last + 1);
        match LAST_TIMESTAMP_MS.compare_exchange_weak(
            last,
            next,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return DateTime::from_timestamp_millis(next).unwrap_or_else(Utc::now),
            Err(current) => last = current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_repeats_and_never_goes_backwards() {
        let mut previous = monotonic_now();
        for _ in 0..100 {
            let next = monotonic_now();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn timestamps_are_millisecond_precision() {
        let ts = monotonic_now();
        assert_eq!(ts.timestamp_subsec_micros() % 1000, 0);
    }
}
