/*! Time structures.

All scheduling in the engine (send queue, forwarder reorder windows, bandwidth gates) works on a
single monotonic clock with microsecond resolution.

 - [Instant] is used to represent absolute time.
 - [Duration] is used to represet relative time.

[Instant]: struct.Instant.html
[Duration]: struct.Duration.html
*/
use core::{fmt, ops};
use core::convert::TryFrom;

pub use core::time::Duration;

const MICROS_PER_SEC: i64 = 1_000_000;

/// A representation of an absolute time value.
///
/// The `Instant` type is a wrapper around a `i64` value that represents a number of
/// microseconds, monotonically increasing since an arbitrary moment in time, such as system
/// startup.
///
/// * A value of `0` is inherently arbitrary.
/// * A value less than `0` indicates a time before the starting point.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant {
    micros: i64,
}

impl Instant {
    /// Create a new `Instant` from a number of microseconds.
    pub const fn from_micros(micros: i64) -> Instant {
        Instant { micros }
    }

    /// Create a new `Instant` from a number of milliseconds.
    pub const fn from_millis(millis: i64) -> Instant {
        Instant { micros: millis * 1000 }
    }

    /// Create an instant from a `(seconds, microseconds)` pair.
    ///
    /// The pair does not need to be normalized, any overflow of the microseconds is carried into
    /// the seconds.
    pub const fn from_parts(secs: i64, micros: i64) -> Instant {
        Instant { micros: secs * MICROS_PER_SEC + micros }
    }

    /// The current value of the monotonic clock.
    pub fn now() -> Instant {
        let (secs, micros) = now_monotonic();
        Instant::from_parts(secs, micros)
    }

    /// The number of whole seconds that have passed since the beginning of time.
    pub fn secs(&self) -> i64 {
        self.micros.div_euclid(MICROS_PER_SEC)
    }

    /// The fractional microseconds, always within `[0, 10^6)`.
    pub fn subsec_micros(&self) -> i64 {
        self.micros.rem_euclid(MICROS_PER_SEC)
    }

    /// The total number of microseconds that have passed since the beginning of time.
    pub fn total_micros(&self) -> i64 {
        self.micros
    }

    /// Time left until `self`, saturating at zero when it already passed.
    pub fn saturating_duration_since(&self, earlier: Instant) -> Duration {
        if self.micros <= earlier.micros {
            Duration::from_micros(0)
        } else {
            Duration::from_micros((self.micros - earlier.micros) as u64)
        }
    }
}

/// Read the monotonic clock as a normalized `(seconds, microseconds)` pair.
#[cfg(all(feature = "sys", unix))]
pub fn now_monotonic() -> (i64, i64) {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: the pointer refers to a valid, writable timespec.
    let res = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if res == -1 {
        return fallback::now();
    }
    normalize(ts.tv_sec as i64, ts.tv_nsec as i64 / 1000)
}

/// Read the monotonic clock as a normalized `(seconds, microseconds)` pair.
#[cfg(not(all(feature = "sys", unix)))]
pub fn now_monotonic() -> (i64, i64) {
    fallback::now()
}

/// Bring the microsecond component into `[0, 10^6)`.
pub fn normalize(secs: i64, micros: i64) -> (i64, i64) {
    (secs + micros.div_euclid(MICROS_PER_SEC), micros.rem_euclid(MICROS_PER_SEC))
}

mod fallback {
    use std::sync::OnceLock;
    use std::time;

    pub(super) fn now() -> (i64, i64) {
        static ORIGIN: OnceLock<time::Instant> = OnceLock::new();
        let elapsed = ORIGIN.get_or_init(time::Instant::now).elapsed();
        super::normalize(elapsed.as_secs() as i64, elapsed.subsec_micros() as i64)
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:06}s", self.secs(), self.subsec_micros())
    }
}

fn micros_of(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant::from_micros(self.micros.saturating_add(micros_of(rhs)))
    }
}

impl ops::AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        self.micros = self.micros.saturating_add(micros_of(rhs));
    }
}

impl ops::Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Instant {
        Instant::from_micros(self.micros.saturating_sub(micros_of(rhs)))
    }
}

impl ops::Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        Duration::from_micros((self.micros - rhs.micros).unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_ops() {
        assert_eq!(Instant::from_micros(4) + Duration::from_micros(6), Instant::from_micros(10));
        assert_eq!(Instant::from_micros(7) - Duration::from_micros(5), Instant::from_micros(2));
        assert_eq!(Instant::from_millis(3) - Instant::from_millis(5), Duration::from_millis(2));
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize(1, 1_500_000), (2, 500_000));
        assert_eq!(normalize(2, -1), (1, 999_999));
        let early = Instant::from_parts(0, -1);
        assert_eq!(early.secs(), -1);
        assert_eq!(early.subsec_micros(), 999_999);
    }

    #[test]
    fn monotonic() {
        let a = Instant::now();
        let b = Instant::now();
        assert!(b >= a);
        let (_, micros) = now_monotonic();
        assert!((0..1_000_000).contains(&micros));
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", Instant::from_parts(5, 42)), "5.000042s");
    }
}
