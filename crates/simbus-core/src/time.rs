//! Simulation time arithmetic.
//!
//! Simulation time is counted in integer nanoseconds in a signed 64-bit
//! representation. [`TimePoint`] marks a position on the simulation time
//! axis; [`Duration`] is the distance between two such positions. Addition
//! of a duration to a time point is lossless; conversions to and from `f64`
//! seconds are lossy and come in two flavours (see [`to_duration`] and
//! [`to_duration_at`]).
//!
//! Simulation time has no relation to wall-clock time. Wall-clock pacing
//! lives in [`crate::pacing`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

const NANOS_PER_SEC: f64 = 1.0e9;

// ---------------------------------------------------------------------------
// Duration
// ---------------------------------------------------------------------------

/// A span of simulation time, in nanoseconds.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Duration(i64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    /// Create a duration from a raw nanosecond count.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// The raw nanosecond count.
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Clamp to the inclusive range `[min, max]`.
    pub fn clamp(self, min: Duration, max: Duration) -> Duration {
        Duration(self.0.clamp(min.0, max.0))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} s", self.0 as f64 / NANOS_PER_SEC)
    }
}

impl Add for Duration {
    type Output = Duration;
    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0 + rhs.0)
    }
}

impl Sub for Duration {
    type Output = Duration;
    fn sub(self, rhs: Duration) -> Duration {
        Duration(self.0 - rhs.0)
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Duration {
    fn sub_assign(&mut self, rhs: Duration) {
        self.0 -= rhs.0;
    }
}

impl Mul<i64> for Duration {
    type Output = Duration;
    fn mul(self, rhs: i64) -> Duration {
        Duration(self.0 * rhs)
    }
}

impl Mul<Duration> for i64 {
    type Output = Duration;
    fn mul(self, rhs: Duration) -> Duration {
        Duration(self * rhs.0)
    }
}

impl Div<i64> for Duration {
    type Output = Duration;
    fn div(self, rhs: i64) -> Duration {
        Duration(self.0 / rhs)
    }
}

impl Neg for Duration {
    type Output = Duration;
    fn neg(self) -> Duration {
        Duration(-self.0)
    }
}

// ---------------------------------------------------------------------------
// TimePoint
// ---------------------------------------------------------------------------

/// A point on the simulation time axis, in nanoseconds since time zero.
///
/// Equality is bit-exact. Fuzzy comparisons near a stop time are the
/// responsibility of the caller (the execution runner uses a relative
/// tolerance of 1 % of the current step size).
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimePoint(i64);

impl TimePoint {
    pub const ZERO: TimePoint = TimePoint(0);

    /// Create a time point from a raw nanosecond count.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// The raw nanosecond count.
    pub const fn as_nanos(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} s", self.0 as f64 / NANOS_PER_SEC)
    }
}

impl Add<Duration> for TimePoint {
    type Output = TimePoint;
    fn add(self, rhs: Duration) -> TimePoint {
        TimePoint(self.0 + rhs.as_nanos())
    }
}

impl Sub<Duration> for TimePoint {
    type Output = TimePoint;
    fn sub(self, rhs: Duration) -> TimePoint {
        TimePoint(self.0 - rhs.as_nanos())
    }
}

impl AddAssign<Duration> for TimePoint {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs.as_nanos();
    }
}

impl Sub for TimePoint {
    type Output = Duration;
    fn sub(self, rhs: TimePoint) -> Duration {
        Duration::from_nanos(self.0 - rhs.0)
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Converts a number of seconds to a [`Duration`], assuming the duration
/// starts at time zero.
///
/// For durations that start at a nonzero time point, use [`to_duration_at`].
/// The conversion is subject to round-off error.
pub fn to_duration(secs: f64) -> Duration {
    Duration::from_nanos((secs * NANOS_PER_SEC).round() as i64)
}

/// Converts a number of seconds to a [`TimePoint`].
///
/// The conversion is subject to round-off error, so
/// `to_secs(to_time_point(t)) == t` does not hold in general.
pub fn to_time_point(secs: f64) -> TimePoint {
    TimePoint::from_nanos(to_duration(secs).as_nanos())
}

/// Converts a [`TimePoint`] to a number of seconds.
pub fn to_secs(t: TimePoint) -> f64 {
    t.as_nanos() as f64 / NANOS_PER_SEC
}

/// Converts a number of seconds to a [`Duration`], given the start time of
/// the duration in seconds.
///
/// The conversion preserves addition of a duration to a time point: if
/// `t1 + d == t2` in seconds, then
/// `to_time_point(t1) + to_duration_at(d, t1) == to_time_point(t2)`.
/// The precision of a floating-point number depends on its absolute value,
/// which is why the start time is required.
pub fn to_duration_at(secs: f64, start_secs: f64) -> Duration {
    to_time_point(start_secs + secs) - to_time_point(start_secs)
}

/// Converts a [`Duration`] to a number of seconds, given the start time of
/// the duration.
///
/// Preserves addition the same way as [`to_duration_at`]: if `t1 + d == t2`,
/// then `to_secs(t1) + duration_to_secs(d, t1) == to_secs(t2)`.
pub fn duration_to_secs(d: Duration, start: TimePoint) -> f64 {
    to_secs(start + d) - to_secs(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_arithmetic() {
        let a = Duration::from_nanos(100);
        let b = Duration::from_nanos(50);
        assert_eq!(a + b, Duration::from_nanos(150));
        assert_eq!(a - b, Duration::from_nanos(50));
        assert_eq!(a * 3, Duration::from_nanos(300));
        assert_eq!(3 * a, Duration::from_nanos(300));
        assert_eq!(a / 4, Duration::from_nanos(25));
        assert_eq!(-a, Duration::from_nanos(-100));
    }

    #[test]
    fn time_point_arithmetic() {
        let t = TimePoint::from_nanos(1_000);
        let d = Duration::from_nanos(500);
        assert_eq!(t + d, TimePoint::from_nanos(1_500));
        assert_eq!(t - d, TimePoint::from_nanos(500));
        assert_eq!((t + d) - t, d);

        let mut t2 = t;
        t2 += d;
        assert_eq!(t2, TimePoint::from_nanos(1_500));
    }

    #[test]
    fn naive_conversion_rounds() {
        assert_eq!(to_duration(0.1), Duration::from_nanos(100_000_000));
        assert_eq!(to_duration(1.0), Duration::from_nanos(1_000_000_000));
        assert_eq!(to_duration(-0.5), Duration::from_nanos(-500_000_000));
        assert_eq!(to_time_point(2.5), TimePoint::from_nanos(2_500_000_000));
    }

    #[test]
    fn addition_preserving_conversion() {
        // If t1 + d == t2 in floating point, the precision-preserving
        // conversion must make the identity hold exactly in nanoseconds.
        let cases = [(0.0, 0.1), (123.456, 0.1), (1.0e6, 1.0 / 3.0), (-10.0, 2.75)];
        for (t1, d) in cases {
            let t2 = t1 + d;
            assert_eq!(
                to_time_point(t1) + to_duration_at(t2 - t1, t1),
                to_time_point(t2),
                "failed for t1={t1}, d={d}"
            );
        }
    }

    #[test]
    fn duration_to_secs_preserves_addition() {
        let t1 = to_time_point(123.456);
        let d = to_duration_at(0.1, 123.456);
        let lhs = to_secs(t1) + duration_to_secs(d, t1);
        let rhs = to_secs(t1 + d);
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn clamp_duration() {
        let min = Duration::from_nanos(10);
        let max = Duration::from_nanos(100);
        assert_eq!(Duration::from_nanos(5).clamp(min, max), min);
        assert_eq!(Duration::from_nanos(50).clamp(min, max), Duration::from_nanos(50));
        assert_eq!(Duration::from_nanos(500).clamp(min, max), max);
    }
}
