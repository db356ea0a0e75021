use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Source of "now" for everything that compares against configured dates or expirations.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        utc_now()
    }
}

/// Clock that only moves when told to. Used by tests and by the admin CLI's `check --at`.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Sort-key friendly timestamp: fixed width, microsecond precision, lexicographic == chronological.
pub fn sort_key_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::hours(25));
        assert_eq!(clock.now(), start + Duration::hours(25));
    }

    #[test]
    fn sort_key_timestamps_order_chronologically() {
        let a = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let b = a + Duration::microseconds(1);
        let c = Utc.with_ymd_and_hms(2025, 12, 1, 9, 0, 0).unwrap();
        assert!(sort_key_timestamp(a) < sort_key_timestamp(b));
        assert!(sort_key_timestamp(b) < sort_key_timestamp(c));
    }
}
