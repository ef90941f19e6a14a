//! Covered-interval arithmetic over epoch milliseconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Gaps narrower than this between covered intervals are closed on merge.
pub const MERGE_TOLERANCE_MS: i64 = 1_000;

/// Closed `[start, end]` span in Unix epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn from_instants(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::new(start.timestamp_millis(), end.timestamp_millis())
    }

    pub fn start_instant(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.start)
    }

    pub fn end_instant(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.end)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let ms = at.timestamp_millis();
        self.start <= ms && ms <= self.end
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }
}

/// Sub-ranges of `requested` not covered by `covered`.
///
/// `covered` need not be normalized. Zero-length remainders are not reported,
/// except for a point request `[t, t]` that no covered interval contains.
pub fn missing_ranges(covered: &[Interval], requested: Interval) -> Vec<Interval> {
    if requested.start == requested.end {
        let hit = covered
            .iter()
            .any(|iv| iv.start <= requested.start && requested.start <= iv.end);
        return if hit { Vec::new() } else { vec![requested] };
    }

    let covered = merge_intervals(covered.to_vec(), 0);
    let mut missing = Vec::new();
    let mut cursor = requested.start;

    for iv in covered {
        if iv.end < cursor {
            continue;
        }
        if iv.start > requested.end {
            break;
        }
        if iv.start > cursor {
            missing.push(Interval::new(cursor, iv.start));
        }
        cursor = cursor.max(iv.end);
        if cursor >= requested.end {
            break;
        }
    }

    if cursor < requested.end {
        missing.push(Interval::new(cursor, requested.end));
    }
    missing
}

/// Sort and coalesce intervals; neighbours closer than `tolerance_ms`
/// become one. Inverted intervals are dropped.
pub fn merge_intervals(mut intervals: Vec<Interval>, tolerance_ms: i64) -> Vec<Interval> {
    intervals.retain(Interval::is_valid);
    intervals.sort_by_key(|iv| (iv.start, iv.end));

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for iv in intervals {
        match merged.last_mut() {
            Some(last)
                if iv.start.saturating_sub(last.end) < tolerance_ms || iv.start <= last.end =>
            {
                last.end = last.end.max(iv.end);
            }
            _ => merged.push(iv),
        }
    }
    merged
}
