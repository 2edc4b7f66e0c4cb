//! Period algebra over closed `[start, end]` time intervals.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    /// `None` when `start > end`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Orders the endpoints
    pub fn spanning(a: DateTime<Utc>, b: DateTime<Utc>) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Widened by `delta` on both sides
    pub fn expand(&self, delta: Duration) -> Self {
        Self::spanning(self.start - delta, self.end + delta)
    }

    pub fn contains(&self, other: &Period) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Overlap length, zero when disjoint or merely touching
    pub fn overlap(&self, other: &Period) -> Duration {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start < end {
            end - start
        } else {
            Duration::zero()
        }
    }

    pub fn clip(&self, bounds: &Period) -> Option<Period> {
        Period::new(self.start.max(bounds.start), self.end.min(bounds.end))
    }
}

/// Merge overlapping or near-adjacent periods (gap ≤ `tolerance`) into a
/// minimal, disjoint, start-ordered set
pub fn reduce_periods(periods: &[Period], tolerance: Duration) -> Vec<Period> {
    let mut sorted = periods.to_vec();
    sorted.sort();

    let mut reduced: Vec<Period> = Vec::with_capacity(sorted.len());
    for period in sorted {
        match reduced.last_mut() {
            Some(current) if period.start <= current.end + tolerance => {
                current.end = current.end.max(period.end);
            }
            _ => reduced.push(period),
        }
    }
    reduced
}

/// Gaps of `expected` not covered by any `observed` period
///
/// Observed periods are clipped to the expected bounds, so over-coverage never
/// produces a gap. A gap shorter than `tolerance + max_gap_offset` is ignored,
/// and zero-length gaps are never reported.
pub fn compute_missing_periods(
    expected: &Period,
    observed: &[Period],
    max_gap_offset: Duration,
    tolerance: Duration,
) -> Vec<Period> {
    let threshold = tolerance + max_gap_offset;
    let clipped: Vec<Period> = observed.iter().filter_map(|p| p.clip(expected)).collect();
    let merged = reduce_periods(&clipped, Duration::zero());

    let mut missing = Vec::new();
    let mut push_gap = |start: DateTime<Utc>, end: DateTime<Utc>| {
        let gap = end - start;
        if gap > Duration::zero() && gap >= threshold {
            missing.push(Period { start, end });
        }
    };

    let mut cursor = expected.start;
    for period in &merged {
        if period.start > cursor {
            push_gap(cursor, period.start);
        }
        cursor = cursor.max(period.end);
    }
    if cursor < expected.end {
        push_gap(cursor, expected.end);
    }
    missing
}

/// Largest pairwise overlap among `periods`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DuplicatedIndicator {
    /// Microseconds
    pub max_overlap_micros: i64,
    /// Overlap as a percentage of the shorter period of the pair
    pub percentage: f64,
}

impl DuplicatedIndicator {
    pub fn none() -> Self {
        Self {
            max_overlap_micros: 0,
            percentage: 0.0,
        }
    }

    pub fn max_overlap(&self) -> Duration {
        Duration::microseconds(self.max_overlap_micros)
    }

    pub fn is_duplicated(&self) -> bool {
        self.max_overlap_micros > 0
    }

    /// The indicator with the larger overlap, ties keep `self`
    pub fn max(self, other: Self) -> Self {
        if other.max_overlap_micros > self.max_overlap_micros {
            other
        } else {
            self
        }
    }
}

pub fn compute_duplicated_indicator(periods: &[Period]) -> DuplicatedIndicator {
    let mut sorted = periods.to_vec();
    sorted.sort();

    let mut best = DuplicatedIndicator::none();
    for (i, a) in sorted.iter().enumerate() {
        for b in &sorted[i + 1..] {
            // Sorted by start: nothing further can overlap `a`
            if b.start >= a.end {
                break;
            }
            let overlap = a.overlap(b);
            let overlap_micros = overlap.num_microseconds().unwrap_or(i64::MAX);
            if overlap_micros <= best.max_overlap_micros {
                continue;
            }
            let shorter = a.duration().min(b.duration());
            let shorter_micros = shorter.num_microseconds().unwrap_or(i64::MAX);
            let percentage = if shorter_micros > 0 {
                (overlap_micros as f64 / shorter_micros as f64 * 100.0).min(100.0)
            } else {
                0.0
            };
            best = DuplicatedIndicator {
                max_overlap_micros: overlap_micros,
                percentage,
            };
        }
    }
    best
}

/// Sum of durations of the periods after merging, so overlaps count once
pub fn covered_duration(periods: &[Period]) -> Duration {
    reduce_periods(periods, Duration::zero())
        .iter()
        .fold(Duration::zero(), |acc, p| acc + p.duration())
}
