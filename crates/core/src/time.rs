//! Time domains carried by samples
//!
//! Earth-receive time, spacecraft event time and sample event time are all
//! [`Timestamp`]s: microseconds since the Unix epoch. The spacecraft clock
//! is its own domain ([`Sclk`]) and is never converted.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::LadError;

/// Microsecond-precision timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Unix epoch
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Maximum representable timestamp
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    /// Current wall-clock time
    ///
    /// Returns the epoch if the system clock reads before it.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as u64)
    }

    /// From microseconds since epoch
    #[inline]
    pub const fn from_micros(micros: u64) -> Self {
        Timestamp(micros)
    }

    /// From milliseconds since epoch
    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Timestamp(millis.saturating_mul(1_000))
    }

    /// From seconds since epoch
    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(1_000_000))
    }

    /// Microseconds since epoch
    #[inline]
    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    /// Milliseconds since epoch (truncates)
    #[inline]
    pub const fn as_millis(&self) -> u64 {
        self.0 / 1_000
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later
    pub fn saturating_elapsed(&self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }

    /// Subtract a duration, saturating at the epoch
    pub fn saturating_sub(&self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_sub(duration.as_micros() as u64))
    }

    /// Add a duration, saturating at `MAX`
    pub fn saturating_add(&self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration.as_micros() as u64))
    }

    /// Parse a query-parameter time bound.
    ///
    /// Accepts epoch milliseconds, RFC 3339 (`2024-03-01T12:00:00Z`) or the
    /// ground-system form `2024-03-01T12:00:00.000` (UTC assumed).
    pub fn parse_bound(s: &str) -> Result<Self, LadError> {
        let s = s.trim();
        if let Ok(millis) = s.parse::<u64>() {
            return Ok(Timestamp::from_millis(millis));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Self::from_datetime(dt.with_timezone(&Utc))
                .ok_or_else(|| LadError::invalid_query(format!("time '{}' is before the epoch", s)));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%jT%H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Self::from_datetime(naive.and_utc()).ok_or_else(|| {
                    LadError::invalid_query(format!("time '{}' is before the epoch", s))
                });
            }
        }
        Err(LadError::invalid_query(format!("unparseable time bound '{}'", s)))
    }

    fn from_datetime(dt: DateTime<Utc>) -> Option<Self> {
        u64::try_from(dt.timestamp_micros()).ok().map(Timestamp)
    }

    /// RFC 3339 rendering with millisecond precision
    pub fn to_rfc3339(&self) -> String {
        match DateTime::<Utc>::from_timestamp_micros(self.0 as i64) {
            Some(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            None => self.0.to_string(),
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.0 / 1_000_000;
        let micros = self.0 % 1_000_000;
        write!(f, "{}.{:06}", secs, micros)
    }
}

impl From<Duration> for Timestamp {
    fn from(duration: Duration) -> Self {
        Timestamp::from_micros(duration.as_micros() as u64)
    }
}

/// Spacecraft clock reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Sclk {
    /// Coarse ticks (seconds)
    pub coarse: u64,
    /// Fine ticks
    pub fine: u32,
}

impl Sclk {
    /// Create a clock reading
    pub fn new(coarse: u64, fine: u32) -> Self {
        Sclk { coarse, fine }
    }
}

impl std::fmt::Display for Sclk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{:05}", self.coarse, self.fine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_units() {
        let ts = Timestamp::from_millis(5000);
        assert_eq!(ts.as_millis(), 5000);
        assert_eq!(ts.as_micros(), 5_000_000);
        assert_eq!(Timestamp::from_secs(2).as_millis(), 2000);
    }

    #[test]
    fn test_saturating_elapsed() {
        let t1 = Timestamp::from_millis(1000);
        let t2 = Timestamp::from_millis(5000);
        assert_eq!(t2.saturating_elapsed(t1), Duration::from_millis(4000));
        assert_eq!(t1.saturating_elapsed(t2), Duration::ZERO);
    }

    #[test]
    fn test_saturating_arithmetic() {
        assert_eq!(
            Timestamp::EPOCH.saturating_sub(Duration::from_micros(1)),
            Timestamp::EPOCH
        );
        assert_eq!(
            Timestamp::MAX.saturating_add(Duration::from_micros(1)),
            Timestamp::MAX
        );
    }

    #[test]
    fn test_parse_bound_millis() {
        let ts = Timestamp::parse_bound("1700000000000").unwrap();
        assert_eq!(ts.as_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_parse_bound_rfc3339() {
        let ts = Timestamp::parse_bound("1970-01-01T00:00:01Z").unwrap();
        assert_eq!(ts, Timestamp::from_secs(1));
        let ts = Timestamp::parse_bound("1970-01-01T00:00:02.500").unwrap();
        assert_eq!(ts, Timestamp::from_millis(2500));
    }

    #[test]
    fn test_parse_bound_rejects_garbage() {
        let err = Timestamp::parse_bound("yesterday").unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_rfc3339_rendering() {
        assert_eq!(
            Timestamp::from_millis(1500).to_rfc3339(),
            "1970-01-01T00:00:01.500Z"
        );
    }

    #[test]
    fn test_serialization_is_transparent() {
        let ts = Timestamp::from_micros(1_234_567);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "1234567");
    }

    #[test]
    fn test_sclk_ordering() {
        assert!(Sclk::new(10, 5) < Sclk::new(10, 6));
        assert!(Sclk::new(9, 65535) < Sclk::new(10, 0));
        assert_eq!(Sclk::new(12, 3).to_string(), "12-00003");
    }
}
