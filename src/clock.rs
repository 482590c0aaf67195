use chrono::{DateTime, Utc};

/// Source of "now" for expiry checks, freshness windows and dwell times.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub mod testing {
    use super::Clock;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use parking_lot::Mutex;

    /// Clock that only moves when a test advances it.
    pub struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                now: Mutex::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()),
            }
        }

        pub fn advance(&self, by: Duration) {
            *self.now.lock() += by;
        }

        pub fn advance_secs_f64(&self, secs: f64) {
            self.advance(Duration::milliseconds((secs * 1000.0).round() as i64));
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }
    }
}
