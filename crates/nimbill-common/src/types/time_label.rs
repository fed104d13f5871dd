//! TimeLabel - fixed-width billing buckets
//!
//! A label identifies one window of the billing timeline. Windows are
//! anchored to the Unix epoch, so every instant belongs to exactly one
//! label of a given width:
//!
//! ```text
//! start = t - (t mod width)
//! range = [start, start + width)
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{NimbillError, Result};

/// Default window width (one hour)
pub const HOUR_SECS: i64 = 3600;

/// A discrete, fixed-width billing window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeLabel {
    /// Inclusive start of the window
    start: DateTime<Utc>,
    /// Window width in seconds
    width_secs: i64,
}

impl TimeLabel {
    /// Hourly label containing `t`
    pub fn hourly(t: DateTime<Utc>) -> Self {
        Self::floor(t, HOUR_SECS)
    }

    /// Label of the given width containing `t`
    pub fn with_width(t: DateTime<Utc>, width_secs: i64) -> Result<Self> {
        if width_secs <= 0 {
            return Err(NimbillError::Validation(format!(
                "window width must be positive, got {}",
                width_secs
            )));
        }
        Ok(Self::floor(t, width_secs))
    }

    /// Alias of [`TimeLabel::hourly`] for the default bucket width
    pub fn from_instant(t: DateTime<Utc>) -> Self {
        Self::hourly(t)
    }

    fn floor(t: DateTime<Utc>, width_secs: i64) -> Self {
        // timestamp() floors towards negative infinity, subsec nanos are never negative
        let rem = t.timestamp().rem_euclid(width_secs);
        let start = t
            - Duration::nanoseconds(i64::from(t.timestamp_subsec_nanos()))
            - Duration::seconds(rem);
        Self { start, width_secs }
    }

    /// Inclusive start of the window
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Exclusive end of the window
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.width()
    }

    pub fn width(&self) -> Duration {
        Duration::seconds(self.width_secs)
    }

    pub fn width_secs(&self) -> i64 {
        self.width_secs
    }

    /// `(start, end)` pair with an exclusive end
    pub fn datetime_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start, self.end())
    }

    /// Following window
    pub fn next(&self) -> Self {
        Self {
            start: self.end(),
            width_secs: self.width_secs,
        }
    }

    /// Preceding window
    pub fn prev(&self) -> Self {
        Self {
            start: self.start - self.width(),
            width_secs: self.width_secs,
        }
    }

    /// Whether `t` falls inside `[start, end)`
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end()
    }

    /// All labels from this one up to (excluding) the label starting at or after `until`
    pub fn iter_until(self, until: DateTime<Utc>) -> impl Iterator<Item = TimeLabel> {
        std::iter::successors(Some(self), |label| Some(label.next()))
            .take_while(move |label| label.start < until)
    }
}

impl fmt::Display for TimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_hourly_floor() {
        let label = TimeLabel::hourly(at(5, 42, 17));
        assert_eq!(label.start(), at(5, 0, 0));
        assert_eq!(label.end(), at(6, 0, 0));
        assert_eq!(label.datetime_range(), (at(5, 0, 0), at(6, 0, 0)));
    }

    #[test]
    fn test_floor_drops_subseconds() {
        let t = at(5, 0, 0) + Duration::milliseconds(750);
        assert_eq!(TimeLabel::hourly(t).start(), at(5, 0, 0));
    }

    #[test]
    fn test_floor_before_epoch() {
        let t = Utc.with_ymd_and_hms(1969, 12, 31, 23, 30, 0).unwrap();
        let label = TimeLabel::hourly(t);
        assert_eq!(label.start(), Utc.with_ymd_and_hms(1969, 12, 31, 23, 0, 0).unwrap());
    }

    #[test]
    fn test_next_and_prev() {
        let label = TimeLabel::hourly(at(5, 10, 0));
        assert_eq!(label.next().start(), at(6, 0, 0));
        assert_eq!(label.next().prev(), label);
        assert!(label < label.next());
    }

    #[test]
    fn test_custom_width() {
        let label = TimeLabel::with_width(at(5, 47, 0), 900).unwrap();
        assert_eq!(label.start(), at(5, 45, 0));
        assert_eq!(label.end(), at(6, 0, 0));
        assert!(TimeLabel::with_width(at(5, 0, 0), 0).is_err());
    }

    #[test]
    fn test_contains_is_half_open() {
        let label = TimeLabel::hourly(at(5, 0, 0));
        assert!(label.contains(at(5, 0, 0)));
        assert!(label.contains(at(5, 59, 59)));
        assert!(!label.contains(at(6, 0, 0)));
    }

    #[test]
    fn test_iter_until() {
        let labels: Vec<_> = TimeLabel::hourly(at(1, 0, 0)).iter_until(at(4, 0, 0)).collect();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels[2].start(), at(3, 0, 0));
    }
}
