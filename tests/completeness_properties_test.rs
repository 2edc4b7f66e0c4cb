//! Property tests for the period algebra, status evaluation and report
//! chunking.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use consolidation_core::completeness::{
    compute_missing_periods, covered_duration, evaluate_status, reduce_periods, CompletenessRecord,
    CompletenessStatus, Period,
};
use consolidation_core::report::{merge_reports, Report, ReportKind};

fn at(offset_seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).single().unwrap() + Duration::seconds(offset_seconds)
}

fn period_strategy() -> impl Strategy<Value = Period> {
    (0i64..10_000, 0i64..2_000).prop_map(|(start, length)| Period::spanning(at(start), at(start + length)))
}

fn periods_strategy() -> impl Strategy<Value = Vec<Period>> {
    prop::collection::vec(period_strategy(), 0..20)
}

fn ids_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-f]{1,3}", 0..30)
}

proptest! {
    /// Reduced periods are ordered, disjoint and cover the same instants
    #[test]
    fn reduced_periods_are_disjoint_and_ordered(periods in periods_strategy()) {
        let reduced = reduce_periods(&periods, Duration::zero());
        for pair in reduced.windows(2) {
            prop_assert!(pair[0].end < pair[1].start);
        }
        prop_assert_eq!(covered_duration(&reduced), covered_duration(&periods));
        prop_assert_eq!(reduce_periods(&reduced, Duration::zero()), reduced);
    }

    /// Gaps never overlap what was observed and stay inside the window
    #[test]
    fn missing_periods_complement_observed(window in period_strategy(), observed in periods_strategy()) {
        let missing = compute_missing_periods(&window, &observed, Duration::zero(), Duration::zero());
        for gap in &missing {
            prop_assert!(window.contains(gap));
            prop_assert!(gap.duration() > Duration::zero());
            for period in &observed {
                prop_assert_eq!(gap.overlap(period), Duration::zero());
            }
        }
        let clipped: Vec<Period> = observed.iter().filter_map(|p| p.clip(&window)).collect();
        let mut all = clipped.clone();
        all.extend(missing.iter().copied());
        prop_assert_eq!(covered_duration(&all), window.duration());
    }

    /// Status depends on the percentage alone
    #[test]
    fn status_is_a_function_of_percentage(observed in 0.0f64..10_000.0, expected in 0.0f64..10_000.0) {
        let record = CompletenessRecord::new(observed, expected);
        prop_assert!(record.adjusted <= record.expected);
        prop_assert!(record.adjusted >= 0.0);
        prop_assert!((0.0..=100.0).contains(&record.percentage));
        prop_assert_eq!(record.status, evaluate_status(record.percentage));
        if expected == 0.0 {
            prop_assert_eq!(record.status, CompletenessStatus::Missing);
        }
    }

    /// Concatenated chunks give back the original ids
    #[test]
    fn split_preserves_ids(ids in ids_strategy(), chunk_size in 1usize..8) {
        let mut report = Report::new(ReportKind::Update, "product");
        for id in &ids {
            report.push(id.clone(), "product-2024-05");
        }
        let expected = report.ids.clone();

        let chunks = report.split(chunk_size);
        prop_assert!(chunks.iter().all(|chunk| chunk.ids.len() <= chunk_size && !chunk.is_empty()));
        let rejoined: Vec<String> = chunks.into_iter().flat_map(|chunk| chunk.ids).collect();
        prop_assert_eq!(rejoined, expected);
    }

    /// Merging is an order-preserving deduplicated union per action
    #[test]
    fn merge_is_deduplicated_union(left in ids_strategy(), right in ids_strategy()) {
        let mut a = Report::new(ReportKind::New, "product");
        left.iter().for_each(|id| a.push(id.clone(), "product-2024-05"));
        let mut b = Report::new(ReportKind::New, "product");
        right.iter().for_each(|id| b.push(id.clone(), "product-2024-06"));

        let merged = merge_reports(vec![a, b]);
        prop_assert_eq!(merged.len(), 1);
        let mut expected: Vec<String> = Vec::new();
        for id in left.iter().chain(right.iter()) {
            if !expected.contains(id) {
                expected.push(id.clone());
            }
        }
        prop_assert_eq!(&merged[0].ids, &expected);
    }
}
