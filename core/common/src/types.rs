//! Common types used throughout VitalSync.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Record category (e.g. "steps", "heart_rate").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Category(String);

impl Category {
    /// Create a new Category.
    ///
    /// # Errors
    /// - Returns error if `name` is empty or only whitespace
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "Category cannot be empty".to_string(),
            ));
        }
        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the app or device that wrote a record (usually a package name).
///
/// An empty origin is allowed: stores report it for records whose writer is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OriginId(String);

impl OriginId {
    /// Create a new OriginId.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the store did not report a writer.
    pub fn is_unknown(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            write!(f, "<unknown>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window.
    ///
    /// # Errors
    /// - Returns error if `end` is before `start`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> crate::Result<Self> {
        if end < start {
            return Err(crate::Error::InvalidInput(format!(
                "Window end {} precedes start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Window covering the `duration` leading up to `end`.
    pub fn ending_at(end: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            start: end - duration,
            end,
        }
    }

    /// Length of the window.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Length of the intersection with another window (zero if disjoint).
    pub fn overlap(&self, other: &TimeWindow) -> Duration {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if end > start {
            end - start
        } else {
            Duration::zero()
        }
    }

    /// Whether `[start, end]` touches this window at all.
    pub fn intersects(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && end >= self.start
    }
}

/// One immutable, timestamped unit of health data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Store-assigned identifier.
    pub id: String,
    pub category: Category,
    /// Writer of this record.
    pub origin: OriginId,
    pub start: DateTime<Utc>,
    /// None for instantaneous samples.
    pub end: Option<DateTime<Utc>>,
    /// Primary numeric payload (step count, calories, bpm …).
    pub value: f64,
}

impl Record {
    /// Create a record spanning `[start, end]`.
    pub fn interval(
        id: impl Into<String>,
        category: Category,
        origin: OriginId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        value: f64,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            origin,
            start,
            end: Some(end),
            value,
        }
    }

    /// Create an instantaneous record.
    pub fn instant(
        id: impl Into<String>,
        category: Category,
        origin: OriginId,
        at: DateTime<Utc>,
        value: f64,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            origin,
            start: at,
            end: None,
            value,
        }
    }

    /// End time, falling back to start for instantaneous records.
    pub fn effective_end(&self) -> DateTime<Utc> {
        self.end.unwrap_or(self.start).max(self.start)
    }

    /// The record's own time range.
    pub fn span(&self) -> TimeWindow {
        TimeWindow {
            start: self.start,
            end: self.effective_end(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_category_creation() {
        let c = Category::new("steps").unwrap();
        assert_eq!(c.as_str(), "steps");
        assert!(Category::new("  ").is_err());
    }

    #[test]
    fn test_unknown_origin_display() {
        assert_eq!(OriginId::new("").to_string(), "<unknown>");
        assert_eq!(OriginId::new("com.fit").to_string(), "com.fit");
    }

    #[test]
    fn test_window_rejects_inverted_range() {
        assert!(TimeWindow::new(at(10, 0), at(9, 0)).is_err());
    }

    #[test]
    fn test_window_overlap() {
        let a = TimeWindow::new(at(10, 0), at(11, 0)).unwrap();
        let b = TimeWindow::new(at(10, 30), at(12, 0)).unwrap();
        let c = TimeWindow::new(at(12, 0), at(13, 0)).unwrap();
        assert_eq!(a.overlap(&b), Duration::minutes(30));
        assert_eq!(a.overlap(&c), Duration::zero());
    }

    #[test]
    fn test_instant_record_span() {
        let r = Record::instant(
            "1",
            Category::new("heart_rate").unwrap(),
            OriginId::new("w"),
            at(8, 0),
            62.0,
        );
        assert_eq!(r.effective_end(), r.start);
        assert_eq!(r.span().duration(), Duration::zero());
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(
            a in 0i64..1000,
            la in 0i64..500,
            b in 0i64..1000,
            lb in 0i64..500,
        ) {
            let base = at(0, 0);
            let wa = TimeWindow::ending_at(base + Duration::minutes(a + la), Duration::minutes(la));
            let wb = TimeWindow::ending_at(base + Duration::minutes(b + lb), Duration::minutes(lb));
            prop_assert_eq!(wa.overlap(&wb), wb.overlap(&wa));
            prop_assert!(wa.overlap(&wb) <= wa.duration().min(wb.duration()));
        }
    }
}
