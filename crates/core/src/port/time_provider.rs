// Time Provider Port (for testability)

use chrono::{NaiveDate, TimeZone, Utc};

/// Time provider interface (allows mocking in tests)
pub trait TimeProvider: Send + Sync {
    /// Get current time in milliseconds since epoch
    fn now_millis(&self) -> i64;

    /// Calendar date (UTC) the run considers "today"
    fn today(&self) -> NaiveDate {
        Utc.timestamp_millis_opt(self.now_millis())
            .single()
            .unwrap_or_else(Utc::now)
            .date_naive()
    }
}

/// System time provider (production)
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock that only moves when told to
    pub struct FixedTimeProvider {
        now: AtomicI64,
    }

    impl FixedTimeProvider {
        pub fn new(now_millis: i64) -> Self {
            Self {
                now: AtomicI64::new(now_millis),
            }
        }

        /// Midnight UTC of the given date
        pub fn at_date(date: NaiveDate) -> Self {
            let millis = date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp_millis())
                .unwrap_or_default();
            Self::new(millis)
        }

        pub fn advance(&self, millis: i64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl TimeProvider for FixedTimeProvider {
        fn now_millis(&self) -> i64 {
            self.now.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::FixedTimeProvider;
    use super::*;

    #[test]
    fn test_today_from_fixed_clock() {
        let date = NaiveDate::from_ymd_opt(2016, 2, 29).unwrap();
        let clock = FixedTimeProvider::at_date(date);
        assert_eq!(clock.today(), date);

        clock.advance(24 * 60 * 60 * 1000);
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2016, 3, 1).unwrap());
    }
}
