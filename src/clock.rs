use chrono::{DateTime, Utc};

/// Source of the current time for token expiry and timeouts
pub trait Clock {
    ///
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Milliseconds elapsed from `since` to `now`, zero if the clock went backwards
pub(crate) fn elapsed_ms(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let elapsed = now.signed_duration_since(since).num_milliseconds();
    u64::try_from(elapsed).unwrap_or(0)
}
