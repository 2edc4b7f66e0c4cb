//! Local (per sub-type) completeness and its roll-up into one global record.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::expected::{ExpectedValueStrategy, MissionTable};
use super::period::{
    compute_duplicated_indicator, compute_missing_periods, covered_duration, DuplicatedIndicator, Period,
};
use super::status::CompletenessRecord;

/// One product as seen by the completeness computation
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedProduct {
    pub key: String,
    pub sub_type: String,
    pub period: Period,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalCompleteness {
    #[serde(flatten)]
    pub record: CompletenessRecord,
    pub duplicated: DuplicatedIndicator,
    pub missing_periods: Vec<Period>,
}

/// Sub-type → local record, ordered by sub-type
pub type CompletenessSet = BTreeMap<String, LocalCompleteness>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalCompleteness {
    #[serde(flatten)]
    pub record: CompletenessRecord,
    /// Subtotal per global group
    pub groups: BTreeMap<String, CompletenessRecord>,
    /// Largest overlap over every sub-type
    pub duplicated: DuplicatedIndicator,
}

/// Completeness of one sub-type of one aggregate window
pub fn compute_local(
    strategy: &ExpectedValueStrategy,
    window: &Period,
    products: &[&ObservedProduct],
) -> LocalCompleteness {
    let periods: Vec<Period> = products.iter().map(|product| product.period).collect();
    let duplicated = compute_duplicated_indicator(&periods);

    match strategy {
        ExpectedValueStrategy::Duration { .. } => {
            let expected = seconds(window);
            let clipped: Vec<Period> = periods.iter().filter_map(|period| period.clip(window)).collect();
            if clipped.is_empty() {
                let missing_periods = if expected > 0.0 { vec![*window] } else { Vec::new() };
                return LocalCompleteness {
                    record: CompletenessRecord::new(0.0, expected),
                    duplicated,
                    missing_periods,
                };
            }

            let missing_periods = compute_missing_periods(
                window,
                &clipped,
                strategy.max_gap_offset(),
                strategy.tolerance(),
            );
            // Gaps under the threshold count as observed
            let covered = duration_seconds(covered_duration(&clipped));
            let uncovered = expected - covered;
            let missing: f64 = missing_periods.iter().map(seconds).sum();
            let forgiven = (uncovered - missing).max(0.0);
            LocalCompleteness {
                record: CompletenessRecord::new(covered + forgiven, expected),
                duplicated,
                missing_periods,
            }
        }
        ExpectedValueStrategy::Count { expected } => {
            let distinct: BTreeSet<&str> = products.iter().map(|product| product.key.as_str()).collect();
            LocalCompleteness {
                record: CompletenessRecord::new(distinct.len() as f64, f64::from(*expected)),
                duplicated,
                missing_periods: Vec::new(),
            }
        }
    }
}

/// Local records for every sub-type of `table` that applies to the
/// datatake's acquisition modes; unknown sub-types are skipped
pub fn compute_set(
    table: &MissionTable,
    datatake_mode: Option<&str>,
    window: &Period,
    products: &[ObservedProduct],
) -> CompletenessSet {
    let mut by_sub_type: BTreeMap<&str, Vec<&ObservedProduct>> = BTreeMap::new();
    for product in products {
        by_sub_type.entry(product.sub_type.as_str()).or_default().push(product);
    }
    let modes = table.acquisition_modes(datatake_mode, by_sub_type.keys().copied());

    table
        .sub_types
        .iter()
        .filter(|(_, rule)| rule.applies_to(&modes))
        .map(|(sub_type, rule)| {
            let observed = by_sub_type.get(sub_type.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            (sub_type.clone(), compute_local(&rule.strategy, window, observed))
        })
        .collect()
}

/// Sum the adjusted values of grouped sub-types against their expected values
pub fn roll_up(table: &MissionTable, set: &CompletenessSet) -> GlobalCompleteness {
    let mut totals: BTreeMap<String, (f64, f64)> = BTreeMap::new();
    let mut duplicated = DuplicatedIndicator::none();

    for (sub_type, local) in set {
        duplicated = duplicated.max(local.duplicated);
        if let Some(group) = table.global_group(sub_type) {
            let entry = totals.entry(group.to_string()).or_insert((0.0, 0.0));
            entry.0 += local.record.adjusted;
            entry.1 += local.record.expected;
        }
    }

    let (adjusted, expected) = totals
        .values()
        .fold((0.0, 0.0), |(a, e), (group_a, group_e)| (a + group_a, e + group_e));
    let groups = totals
        .into_iter()
        .map(|(group, (a, e))| (group, CompletenessRecord::new(a, e)))
        .collect();

    GlobalCompleteness {
        record: CompletenessRecord::new(adjusted, expected),
        groups,
        duplicated,
    }
}

fn seconds(period: &Period) -> f64 {
    duration_seconds(period.duration())
}

fn duration_seconds(duration: Duration) -> f64 {
    duration
        .num_microseconds()
        .map(|micros| micros as f64 / 1_000_000.0)
        .unwrap_or_else(|| duration.num_seconds() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completeness::status::CompletenessStatus;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn product(key: &str, sub_type: &str, start: i64, end: i64) -> ObservedProduct {
        ObservedProduct {
            key: key.to_string(),
            sub_type: sub_type.to_string(),
            period: Period::new(t(start), t(end)).unwrap(),
        }
    }

    fn table() -> MissionTable {
        MissionTable::new("S1", 175)
            .with_sub_type("RAW", ExpectedValueStrategy::duration(0), Some("L0"))
            .with_sub_type("SLC", ExpectedValueStrategy::duration(0), Some("L1"))
            .with_sub_type("GRD", ExpectedValueStrategy::duration(0), Some("L1"))
            .with_sub_type("OCN", ExpectedValueStrategy::Count { expected: 2 }, None)
    }

    #[test]
    fn test_local_duration_completeness() {
        let window = Period::new(t(0), t(100)).unwrap();
        let products = [product("a", "RAW", 0, 40), product("b", "RAW", 60, 100)];
        let refs: Vec<&ObservedProduct> = products.iter().collect();
        let local = compute_local(&ExpectedValueStrategy::duration(0), &window, &refs);

        assert_eq!(local.record.expected, 100.0);
        assert_eq!(local.record.observed, 80.0);
        assert_eq!(local.record.status, CompletenessStatus::Partial);
        assert_eq!(local.missing_periods, vec![Period::new(t(40), t(60)).unwrap()]);
        assert!(!local.duplicated.is_duplicated());
    }

    #[test]
    fn test_local_count_completeness_counts_distinct_keys() {
        let window = Period::new(t(0), t(100)).unwrap();
        let products = [product("a", "OCN", 0, 10), product("a", "OCN", 0, 10)];
        let refs: Vec<&ObservedProduct> = products.iter().collect();
        let local = compute_local(&ExpectedValueStrategy::Count { expected: 2 }, &window, &refs);
        assert_eq!(local.record.observed, 1.0);
        assert_eq!(local.record.percentage, 50.0);
        assert!(local.duplicated.is_duplicated());
    }

    #[test]
    fn test_roll_up_sums_grouped_sub_types() {
        let window = Period::new(t(0), t(100)).unwrap();
        let products = vec![
            product("a", "RAW", 0, 100),
            product("b", "SLC", 0, 50),
            product("c", "GRD", 0, 120),
            product("d", "GRD", 90, 100),
        ];
        let table = table();
        let set = compute_set(&table, None, &window, &products);
        assert_eq!(set.len(), 4);
        assert_eq!(set["OCN"].record.status, CompletenessStatus::Missing);

        let global = roll_up(&table, &set);
        // RAW 100/100, SLC 50/100, GRD 100/100; OCN excluded
        assert_eq!(global.record.expected, 300.0);
        assert_eq!(global.record.adjusted, 250.0);
        assert_eq!(global.groups["L0"].percentage, 100.0);
        assert_eq!(global.groups["L1"].adjusted, 150.0);
        assert_eq!(global.duplicated.max_overlap(), Duration::seconds(10));
    }

    #[test]
    fn test_local_duration_without_products_is_missing() {
        // Window shorter than the tolerance
        let window = Period::new(t(0), t(1)).unwrap();
        let local = compute_local(&ExpectedValueStrategy::duration(2), &window, &[]);
        assert_eq!(local.record.observed, 0.0);
        assert_eq!(local.record.status, CompletenessStatus::Missing);
        assert_eq!(local.missing_periods, vec![window]);

        let outside = [product("a", "RAW", 10, 20)];
        let refs: Vec<&ObservedProduct> = outside.iter().collect();
        let local = compute_local(&ExpectedValueStrategy::duration(2), &window, &refs);
        assert_eq!(local.record.status, CompletenessStatus::Missing);
    }

    #[test]
    fn test_local_duration_forgives_gaps_under_tolerance() {
        let window = Period::new(t(0), t(100)).unwrap();
        let products = [product("a", "RAW", 1, 50), product("b", "RAW", 51, 100)];
        let refs: Vec<&ObservedProduct> = products.iter().collect();
        let local = compute_local(&ExpectedValueStrategy::duration(2), &window, &refs);
        assert!(local.missing_periods.is_empty());
        assert_eq!(local.record.observed, 100.0);
        assert_eq!(local.record.status, CompletenessStatus::Complete);
    }

    #[test]
    fn test_set_only_holds_sub_types_of_the_acquisition_mode() {
        let table = MissionTable::defaults().into_iter().find(|table| table.mission == "S1").unwrap();
        let window = Period::new(t(0), t(600)).unwrap();
        let products = vec![
            product("raw", "IW_RAW__0S", 0, 600),
            product("slc", "IW_SLC__1S", 0, 600),
            product("grd", "IW_GRDH_1S", 0, 600),
            product("ocn", "IW_OCN__2S", 0, 600),
        ];

        let set = compute_set(&table, None, &window, &products);
        assert_eq!(set.keys().map(String::as_str).collect::<Vec<_>>(), ["IW_GRDH_1S", "IW_OCN__2S", "IW_RAW__0S", "IW_SLC__1S"]);
        let global = roll_up(&table, &set);
        assert_eq!(global.record.expected, 1800.0);
        assert_eq!(global.record.percentage, 100.0);
        assert_eq!(global.record.status, CompletenessStatus::Complete);

        // Explicit mode wins over what was observed
        let set = compute_set(&table, Some("EW"), &window, &products);
        assert_eq!(set.keys().map(String::as_str).collect::<Vec<_>>(), ["EW_GRDM_1S", "EW_RAW__0S"]);
        assert_eq!(roll_up(&table, &set).record.status, CompletenessStatus::Missing);
    }

    #[test]
    fn test_roll_up_of_empty_set_is_missing() {
        let global = roll_up(&table(), &CompletenessSet::new());
        assert_eq!(global.record.status, CompletenessStatus::Missing);
        assert!(global.groups.is_empty());
    }
}
