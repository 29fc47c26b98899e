//! Time functionality used throughout the block-builder.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self
)]

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use std::{
    fmt::Debug,
    sync::Arc,
    time::{Duration, SystemTime},
};

/// A point in time, represented as nanoseconds since the Unix epoch.
///
/// Wrapping this value (rather than passing [`SystemTime`] or [`DateTime<Utc>`] around
/// directly) lets tests substitute a [`MockProvider`] for a [`SystemProvider`] without
/// threading a generic clock type through every function signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(i64);

impl Time {
    /// The current time according to the system clock.
    pub fn from_system_time(t: SystemTime) -> Self {
        let dur = t
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("time must be after the epoch");
        Self(dur.as_nanos() as i64)
    }

    /// Construct a [`Time`] from nanoseconds since the Unix epoch.
    pub fn from_timestamp_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Construct a [`Time`] from milliseconds since the Unix epoch.
    ///
    /// Note: round trips through [`Time`] are only guaranteed at millisecond precision.
    pub fn from_timestamp_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Nanoseconds since the Unix epoch.
    pub fn timestamp_nanos(&self) -> i64 {
        self.0
    }

    /// Milliseconds since the Unix epoch.
    pub fn timestamp_millis(&self) -> i64 {
        self.0 / 1_000_000
    }

    /// This [`Time`] as a [`DateTime<Utc>`].
    pub fn date_time(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.0)
    }

    /// Computes `self + duration`, saturating at the numeric bounds instead of overflowing.
    pub fn checked_add(&self, duration: Duration) -> Option<Self> {
        let nanos = i64::try_from(duration.as_nanos()).ok()?;
        self.0.checked_add(nanos).map(Self)
    }

    /// Computes the duration elapsed between `earlier` and `self`, or `None` if `earlier` is
    /// after `self`.
    pub fn checked_duration_since(&self, earlier: Self) -> Option<Duration> {
        if self.0 < earlier.0 {
            return None;
        }
        Some(Duration::from_nanos((self.0 - earlier.0) as u64))
    }
}

/// Something that can report the current time.
///
/// Implementations MUST be cheap to call repeatedly and safe to share across tasks; the
/// block-builder's consume loop and lag-reporting loop each hold their own `Arc<dyn TimeProvider>`.
pub trait TimeProvider: Debug + Send + Sync + 'static {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// A [`TimeProvider`] that reads the real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider {}

impl SystemProvider {
    /// Create a new [`SystemProvider`].
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        Time::from_system_time(SystemTime::now())
    }
}

/// A [`TimeProvider`] with a settable time, for deterministic tests.
#[derive(Debug)]
pub struct MockProvider {
    now: RwLock<Time>,
}

impl MockProvider {
    /// Create a new [`MockProvider`] starting at the given time.
    pub fn new(start: Time) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Set the time reported by this provider.
    pub fn set(&self, time: Time) {
        *self.now.write() = time;
    }

    /// Advance the time reported by this provider by `duration`, returning the new time.
    pub fn inc(&self, duration: Duration) -> Time {
        let mut now = self.now.write();
        *now = now.checked_add(duration).expect("time overflow");
        *now
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.read()
    }
}

impl TimeProvider for Arc<dyn TimeProvider> {
    fn now(&self) -> Time {
        self.as_ref().now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_provider_advances() {
        let t0 = Time::from_timestamp_nanos(0);
        let mock = MockProvider::new(t0);
        assert_eq!(mock.now(), t0);

        let t1 = mock.inc(Duration::from_secs(1));
        assert_eq!(t1, Time::from_timestamp_nanos(1_000_000_000));
        assert_eq!(mock.now(), t1);
    }

    #[test]
    fn duration_since() {
        let t0 = Time::from_timestamp_nanos(100);
        let t1 = Time::from_timestamp_nanos(300);
        assert_eq!(t1.checked_duration_since(t0), Some(Duration::from_nanos(200)));
        assert_eq!(t0.checked_duration_since(t1), None);
    }

    #[test]
    fn millis_roundtrip() {
        let t = Time::from_timestamp_millis(1_000);
        assert_eq!(t.timestamp_millis(), 1_000);
    }
}
