//! WeightSegments - weighted, deviation-tolerant interval set
//!
//! Stores closed integer intervals `[start, end]` with a scalar weight in a
//! sorted `Vec`. Inserting a range is authoritative: whatever it covers is
//! overwritten, and overlapped intervals of another weight keep only their
//! uncovered remainders. The inserted interval then absorbs its immediate
//! neighbours while they carry the same weight and the gap
//! `next.start - this.end` is at most `deviation`.
//!
//! ```text
//! deviation = 1
//! [30,41]@17 [50,60]@5   + [30,51]@19   =>   [30,51]@19 [52,60]@5
//! ```

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SegmentError;

/// Weight used by the unweighted API
pub const DEFAULT_WEIGHT: i64 = 1;

/// One stored interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    /// Inclusive start
    pub start: i64,
    /// Inclusive end
    pub end: i64,
    pub weight: i64,
}

impl Segment {
    /// Number of ordinal points covered
    pub fn len(&self) -> i128 {
        span(self.start, self.end)
    }
}

/// Ordered, non-overlapping weighted interval set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightSegments {
    segments: Vec<Segment>,
    deviation: u64,
}

impl WeightSegments {
    /// Create an empty set merging same-weight intervals at most `deviation` apart
    pub fn new(deviation: u64) -> Self {
        Self {
            segments: Vec::new(),
            deviation,
        }
    }

    pub fn deviation(&self) -> u64 {
        self.deviation
    }

    /// Insert `[start, end]` with the default weight
    pub fn add(&mut self, start: i64, end: i64) -> Result<(), SegmentError> {
        self.add_range(start, end, DEFAULT_WEIGHT)
    }

    /// Insert `[start, end]` with `weight`, overwriting anything it covers
    pub fn add_range(&mut self, start: i64, end: i64, weight: i64) -> Result<(), SegmentError> {
        if end < start {
            return Err(SegmentError::InvertedRange { start, end });
        }

        // segments[lo..hi] intersect [start, end]
        let lo = self.segments.partition_point(|s| s.end < start);
        let hi = self.segments.partition_point(|s| s.start <= end);

        let mut merged = Segment { start, end, weight };
        let mut left = None;
        let mut right = None;

        if lo < hi {
            let first = self.segments[lo];
            let last = self.segments[hi - 1];

            // Same-weight overlaps are absorbed rather than cut
            if first.weight == weight {
                merged.start = merged.start.min(first.start);
            } else if first.start < start {
                left = Some(Segment {
                    start: first.start,
                    end: start - 1,
                    weight: first.weight,
                });
            }

            if last.weight == weight {
                merged.end = merged.end.max(last.end);
            } else if last.end > end {
                right = Some(Segment {
                    start: end + 1,
                    end: last.end,
                    weight: last.weight,
                });
            }
        }

        let idx = lo + usize::from(left.is_some());
        let replacement = left.into_iter().chain(Some(merged)).chain(right);
        self.segments.splice(lo..hi, replacement);

        self.coalesce(idx);
        Ok(())
    }

    /// Merge the segment at `idx` with equal-weight neighbours, cascading
    fn coalesce(&mut self, mut idx: usize) {
        loop {
            let mut changed = false;

            if idx > 0 && self.mergeable(idx - 1, idx) {
                let cur = self.segments.remove(idx);
                idx -= 1;
                let prev = &mut self.segments[idx];
                prev.end = prev.end.max(cur.end);
                changed = true;
            }

            if idx + 1 < self.segments.len() && self.mergeable(idx, idx + 1) {
                let next = self.segments.remove(idx + 1);
                let cur = &mut self.segments[idx];
                cur.end = cur.end.max(next.end);
                changed = true;
            }

            if !changed {
                break;
            }
        }
    }

    fn mergeable(&self, left: usize, right: usize) -> bool {
        let (a, b) = (self.segments[left], self.segments[right]);
        let gap = i128::from(b.start) - i128::from(a.end);
        a.weight == b.weight && gap <= i128::from(self.deviation)
    }

    /// Stored intervals clipped to `[lo, hi]`, in ascending order
    pub fn in_range(&self, lo: i64, hi: i64) -> InRange<'_> {
        let first = self.segments.partition_point(|s| s.end < lo);
        InRange {
            segments: self.segments[first..].iter(),
            lo,
            hi,
        }
    }

    /// Total covered points, ignoring weight
    pub fn length(&self) -> i128 {
        self.segments.iter().map(Segment::len).sum()
    }

    /// Total covered points multiplied by their weight
    pub fn weight(&self) -> i128 {
        self.segments.iter().map(|s| s.len() * i128::from(s.weight)).sum()
    }

    /// Number of stored intervals
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Flattened `[start0, end0, start1, end1, ...]`
    pub fn edges(&self) -> Vec<i64> {
        self.segments.iter().flat_map(|s| [s.start, s.end]).collect()
    }

    /// Compact text form: `start:end:weight` entries joined by `;`
    pub fn serialize_str(&self) -> String {
        let mut out = String::with_capacity(self.segments.len() * 16);
        for (i, s) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            // Writing into a String cannot fail
            let _ = write!(out, "{}:{}:{}", s.start, s.end, s.weight);
        }
        out
    }

    /// Parse [`WeightSegments::serialize_str`] output.
    ///
    /// Malformed input yields an empty set with the given deviation.
    pub fn deserialize_str(s: &str, deviation: u64) -> Self {
        match Self::parse(s, deviation) {
            Some(parsed) => parsed,
            None => {
                warn!(input_len = s.len(), "Discarding malformed segment encoding");
                Self::new(deviation)
            }
        }
    }

    fn parse(s: &str, deviation: u64) -> Option<Self> {
        let mut out = Self::new(deviation);
        if s.trim().is_empty() {
            return Some(out);
        }

        let mut prev_end: Option<i64> = None;
        for entry in s.split(';') {
            let mut parts = entry.trim().split(':');
            let start = parts.next()?.parse::<i64>().ok()?;
            let end = parts.next()?.parse::<i64>().ok()?;
            let weight = parts.next()?.parse::<i64>().ok()?;
            if parts.next().is_some() || end < start || prev_end.is_some_and(|p| start <= p) {
                return None;
            }
            prev_end = Some(end);
            out.add_range(start, end, weight).ok()?;
        }
        Some(out)
    }
}

/// Points in `[start, end]`.
///
/// Disjoint spans cover at most 2^64 points and weights are at most 2^63 in
/// magnitude, so lengths and weighted totals always fit in `i128`.
fn span(start: i64, end: i64) -> i128 {
    i128::from(end) - i128::from(start) + 1
}

impl<'a> IntoIterator for &'a WeightSegments {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

/// Lazy view of stored intervals clipped to a range
#[derive(Debug, Clone)]
pub struct InRange<'a> {
    segments: std::slice::Iter<'a, Segment>,
    lo: i64,
    hi: i64,
}

impl InRange<'_> {
    /// Total clipped points, ignoring weight
    pub fn length(self) -> i128 {
        self.map(|((start, end), _)| span(start, end)).sum()
    }

    /// Total clipped points multiplied by weight
    pub fn weight(self) -> i128 {
        self.map(|((start, end), weight)| span(start, end) * i128::from(weight)).sum()
    }
}

impl Iterator for InRange<'_> {
    type Item = ((i64, i64), i64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.lo > self.hi {
            return None;
        }
        let s = self.segments.next()?;
        if s.start > self.hi {
            // Sorted, nothing further can intersect
            self.segments = <&[Segment]>::default().iter();
            return None;
        }
        Some(((s.start.max(self.lo), s.end.min(self.hi)), s.weight))
    }
}
