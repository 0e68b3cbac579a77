//! Layer 0: Time primitives
//!
//! Timestamp: a UTC instant, compared at serialized (whole-second) precision
//! for merge decisions because the persistent format stores seconds.
//! TimeInfo: the six-timestamp bundle carried by every group and entry.
//! Clock: process-wide time source, swappable under the test harness.

use std::sync::{Arc, OnceLock, RwLock};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// UTC instant at native precision.
///
/// Runtime clocks carry sub-second precision the persistent format cannot
/// represent; anything that decides a merge outcome compares through
/// [`Timestamp::serialized`] instead of raw equality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

impl Timestamp {
    pub const UNIX_EPOCH: Timestamp = Timestamp(OffsetDateTime::UNIX_EPOCH);

    pub fn new(instant: OffsetDateTime) -> Self {
        Self(instant)
    }

    /// Truncate to whole-second (serialized) precision.
    pub fn serialized(self) -> Self {
        self.0.replace_nanosecond(0).map(Self).unwrap_or(self)
    }

    pub fn instant(self) -> OffsetDateTime {
        self.0
    }

    pub fn unix_timestamp(self) -> i64 {
        self.0.unix_timestamp()
    }

    pub fn offset_by(self, duration: Duration) -> Self {
        Self(self.0 + duration)
    }
}

impl From<OffsetDateTime> for Timestamp {
    fn from(instant: OffsetDateTime) -> Self {
        Self(instant)
    }
}

/// Source of the current time.
pub trait ClockSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

struct SystemClockSource;

impl ClockSource for SystemClockSource {
    fn now(&self) -> Timestamp {
        Timestamp(OffsetDateTime::now_utc())
    }
}

fn clock_source() -> &'static RwLock<Arc<dyn ClockSource>> {
    static SOURCE: OnceLock<RwLock<Arc<dyn ClockSource>>> = OnceLock::new();
    SOURCE.get_or_init(|| RwLock::new(Arc::new(SystemClockSource)))
}

/// Process-wide clock.
pub struct Clock;

impl Clock {
    pub fn now() -> Timestamp {
        let source = clock_source()
            .read()
            .unwrap_or_else(|err| err.into_inner());
        source.now()
    }

    /// Current time truncated to serialized precision.
    pub fn now_serialized() -> Timestamp {
        Self::now().serialized()
    }
}

#[cfg(any(test, feature = "test-harness"))]
static CLOCK_LOCK: OnceLock<std::sync::Mutex<()>> = OnceLock::new();

#[cfg(any(test, feature = "test-harness"))]
pub struct ClockGuard {
    prev: Arc<dyn ClockSource>,
    _lock: std::sync::MutexGuard<'static, ()>,
}

#[cfg(any(test, feature = "test-harness"))]
impl Drop for ClockGuard {
    fn drop(&mut self) {
        let mut guard = clock_source()
            .write()
            .unwrap_or_else(|err| err.into_inner());
        *guard = self.prev.clone();
    }
}

#[cfg(any(test, feature = "test-harness"))]
pub fn set_clock_source_for_tests(source: Arc<dyn ClockSource>) -> ClockGuard {
    let lock = CLOCK_LOCK
        .get_or_init(|| std::sync::Mutex::new(()))
        .lock()
        .unwrap_or_else(|err| err.into_inner());
    let mut guard = clock_source()
        .write()
        .unwrap_or_else(|err| err.into_inner());
    let prev = guard.clone();
    *guard = source;
    ClockGuard { prev, _lock: lock }
}

/// The six timestamps attached to every group and entry.
///
/// `last_access` and `usage_count` are access statistics, not content; the
/// relaxed equality below ignores them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInfo {
    pub creation: Timestamp,
    pub last_modification: Timestamp,
    pub last_access: Timestamp,
    pub expiry: Timestamp,
    pub expires: bool,
    pub usage_count: u32,
    pub location_changed: Timestamp,
}

impl TimeInfo {
    /// Fresh record with every timestamp set to `at`.
    pub fn at(at: Timestamp) -> Self {
        Self {
            creation: at,
            last_modification: at,
            last_access: at,
            expiry: at,
            expires: false,
            usage_count: 0,
            location_changed: at,
        }
    }

    pub fn now() -> Self {
        Self::at(Clock::now())
    }

    /// Content equality, optionally at serialized precision and ignoring
    /// location.
    pub fn equivalent(
        &self,
        other: &Self,
        ignore_milliseconds: bool,
        ignore_location: bool,
    ) -> bool {
        let reduce = |t: Timestamp| if ignore_milliseconds { t.serialized() } else { t };
        reduce(self.creation) == reduce(other.creation)
            && reduce(self.last_modification) == reduce(other.last_modification)
            && reduce(self.expiry) == reduce(other.expiry)
            && self.expires == other.expires
            && (ignore_location
                || reduce(self.location_changed) == reduce(other.location_changed))
    }
}
