//! Simulated time and the virtual clock.
//!
//! [`SimTime`] is the only notion of "when" inside a simulation: a nanosecond
//! count since the start of the run. [`SimClock`] holds the current time and is
//! advanced exclusively by the [`Simulator`](crate::Simulator) as it fires
//! events, so every other component sees it as read-only.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use evsim::SimTime;
//!
//! let t = SimTime::from_millis(5) + Duration::from_micros(500);
//! assert_eq!(t.as_nanos(), 5_500_000);
//! assert_eq!(t.to_string(), "0.005500000s");
//! ```

use std::fmt;
use std::ops::Add;
use std::time::Duration;

// ============================================================================
// SimTime
// ============================================================================

/// A point in simulated time, in nanoseconds since the start of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimTime(u64);

impl SimTime {
    /// The start of every simulation.
    pub const ZERO: SimTime = SimTime(0);

    /// The latest representable instant.
    pub const MAX: SimTime = SimTime(u64::MAX);

    /// Creates a time from a raw nanosecond count.
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Creates a time from milliseconds.
    ///
    /// # Panics
    ///
    /// Panics if the nanosecond count overflows simulated time.
    pub const fn from_millis(ms: u64) -> Self {
        match ms.checked_mul(NANOS_PER_MILLI) {
            Some(ns) => Self(ns),
            None => panic!("simulated time overflow"),
        }
    }

    /// Creates a time from seconds.
    ///
    /// # Panics
    ///
    /// Panics if the nanosecond count overflows simulated time.
    pub const fn from_secs(sec: u64) -> Self {
        match sec.checked_mul(NANOS_PER_SEC) {
            Some(ns) => Self(ns),
            None => panic!("simulated time overflow"),
        }
    }

    /// Returns the raw nanosecond count.
    #[inline]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the time as whole milliseconds (truncating).
    #[inline]
    pub const fn as_millis(self) -> u64 {
        ns_to_ms(self.0)
    }

    /// Returns the time elapsed since `earlier`, or zero if `earlier` is later.
    pub fn saturating_since(self, earlier: SimTime) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    /// Adds a delay, returning `None` if the result is not representable.
    pub fn checked_add(self, delay: Duration) -> Option<SimTime> {
        let delta = u64::try_from(delay.as_nanos()).ok()?;
        self.0.checked_add(delta).map(SimTime)
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    /// # Panics
    ///
    /// Panics if the sum overflows simulated time.
    fn add(self, delay: Duration) -> SimTime {
        self.checked_add(delay).expect("simulated time overflow")
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}s", ns_to_sec(self.0), self.0 % 1_000_000_000)
    }
}

impl From<SimTime> for u64 {
    fn from(time: SimTime) -> Self {
        time.0
    }
}

// ============================================================================
// SimClock
// ============================================================================

/// Simulated clock with nanosecond precision.
///
/// Time only moves forward, and only when the scheduler fires an event.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: SimTime,
}

impl SimClock {
    /// Creates a new clock starting at time zero.
    pub fn new() -> Self {
        Self { now: SimTime::ZERO }
    }

    /// Returns the current simulated time.
    #[inline]
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Advances the clock to the specified time.
    ///
    /// # Panics
    ///
    /// Panics if the target time is before the current time.
    pub(crate) fn advance_to(&mut self, target: SimTime) {
        assert!(
            target >= self.now,
            "cannot go back in time: current={}, target={}",
            self.now,
            target
        );
        self.now = target;
    }
}

// ============================================================================
// Time Conversion Helpers
// ============================================================================

const NANOS_PER_MILLI: u64 = 1_000_000;
const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Converts milliseconds to nanoseconds.
///
/// # Panics
///
/// Panics if the result overflows `u64`.
#[inline]
pub const fn ms_to_ns(ms: u64) -> u64 {
    SimTime::from_millis(ms).as_nanos()
}

/// Converts seconds to nanoseconds.
///
/// # Panics
///
/// Panics if the result overflows `u64`.
#[inline]
pub const fn sec_to_ns(sec: u64) -> u64 {
    SimTime::from_secs(sec).as_nanos()
}

/// Converts nanoseconds to milliseconds (truncating).
#[inline]
pub const fn ns_to_ms(ns: u64) -> u64 {
    ns / NANOS_PER_MILLI
}

/// Converts nanoseconds to seconds (truncating).
#[inline]
pub const fn ns_to_sec(ns: u64) -> u64 {
    ns / NANOS_PER_SEC
}

// ============================================================================
// Tests
// ============================================================================
