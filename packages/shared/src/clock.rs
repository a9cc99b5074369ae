//! Deadline arithmetic shared by the coordinator and the client watcher.
//!
//! Deadlines are stored as absolute UTC instants; everything user facing is
//! expressed as whole seconds remaining, floored at zero.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Source of "now". The coordinator and watcher never call `Utc::now()` directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Whole seconds from `now` until `deadline`, never negative.
///
/// A missing deadline counts as already expired.
pub fn remaining_seconds(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u64 {
    match deadline {
        Some(deadline) => (deadline - now).num_seconds().max(0) as u64,
        None => 0,
    }
}

/// Renders a countdown as `M:SS`.
pub fn format_timer(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_remaining_seconds_counts_down() {
        let now = base();
        assert_eq!(remaining_seconds(Some(now + Duration::seconds(60)), now), 60);
        assert_eq!(
            remaining_seconds(Some(now + Duration::milliseconds(1500)), now),
            1
        );
    }

    #[test]
    fn test_remaining_seconds_without_deadline_is_zero() {
        assert_eq!(remaining_seconds(None, base()), 0);
    }

    #[test]
    fn test_format_timer() {
        assert_eq!(format_timer(0), "0:00");
        assert_eq!(format_timer(59), "0:59");
        assert_eq!(format_timer(60), "1:00");
        assert_eq!(format_timer(180), "3:00");
        assert_eq!(format_timer(605), "10:05");
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(base());
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), base() + Duration::seconds(90));

        clock.set(base());
        assert_eq!(clock.now(), base());
    }

    proptest! {
        #[test]
        fn prop_past_deadlines_floor_at_zero(offset_ms in 0i64..10_000_000_000) {
            let now = base();
            let deadline = now - Duration::milliseconds(offset_ms);
            prop_assert_eq!(remaining_seconds(Some(deadline), now), 0);
        }

        #[test]
        fn prop_future_deadlines_never_exceed_offset(offset_s in 0i64..1_000_000) {
            let now = base();
            let deadline = now + Duration::seconds(offset_s);
            prop_assert_eq!(remaining_seconds(Some(deadline), now), offset_s as u64);
        }
    }
}
