//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Process-wide origin clock and wall time helpers."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use chrono::Utc;
use parking_lot::Mutex;

/// Wall time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn now_nanos() -> i64 {
    Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_micros().saturating_mul(1000))
}

/// Strictly increasing nanosecond origin source shared by every reading and event.
///
/// Values are seeded from wall time; when wall time has not advanced past the last
/// issued origin the clock steps one nanosecond past it instead.
#[derive(Debug, Default)]
pub struct OriginClock {
    last: Mutex<i64>,
}

impl OriginClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next origin.
    pub fn next(&self) -> i64 {
        self.next_after(0)
    }

    /// Issue the next origin, preferring `hint` (a driver supplied timestamp) over
    /// wall time when non-zero. The result is still strictly greater than every
    /// previously issued origin.
    pub fn next_after(&self, hint: i64) -> i64 {
        let candidate = if hint > 0 { hint } else { now_nanos() };
        let mut last = self.last.lock();
        let origin = if candidate > *last {
            candidate
        } else {
            *last + 1
        };
        *last = origin;
        origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn origins_strictly_increase() {
        let clock = OriginClock::new();
        let mut previous = clock.next();
        for _ in 0..10_000 {
            let next = clock.next();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn stale_hint_is_bumped_past_last_origin() {
        let clock = OriginClock::new();
        let first = clock.next();
        let second = clock.next_after(5);
        assert_eq!(second, first + 1);
        let future = first + 1_000_000_000;
        assert_eq!(clock.next_after(future), future);
    }

    #[test]
    fn concurrent_callers_never_share_an_origin() {
        let clock = Arc::new(OriginClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = clock.clone();
                std::thread::spawn(move || (0..1000).map(|_| clock.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
