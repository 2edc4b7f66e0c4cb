//! Attaching products to the datatake (acquisition pass) that covers them.

use chrono::Duration;

use super::period::Period;

#[derive(Debug, Clone, PartialEq)]
pub struct DatatakeCandidate {
    /// Document id of the datatake
    pub key: String,
    pub datatake_id: String,
    pub satellite_unit: String,
    pub period: Period,
}

/// Distance between a product and a datatake, zero when fully inside
pub fn temporal_distance(product: &Period, candidate: &Period) -> Duration {
    let before = (candidate.start - product.start).max(Duration::zero());
    let after = (product.end - candidate.end).max(Duration::zero());
    before + after
}

/// The candidate covering `product` within `delta` on each side, closest first
///
/// On equal distance the earliest candidate in the given order wins.
pub fn attach_nearest<'a>(
    product: &Period,
    candidates: &'a [DatatakeCandidate],
    delta: Duration,
) -> Option<&'a DatatakeCandidate> {
    let mut best: Option<(&DatatakeCandidate, Duration)> = None;
    for candidate in candidates {
        if !candidate.period.expand(delta).contains(product) {
            continue;
        }
        let distance = temporal_distance(product, &candidate.period);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((candidate, distance)),
        }
    }
    best.map(|(candidate, _)| candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn candidate(key: &str, start: i64, end: i64) -> DatatakeCandidate {
        DatatakeCandidate {
            key: key.to_string(),
            datatake_id: key.to_uppercase(),
            satellite_unit: "S1A".to_string(),
            period: Period::new(t(start), t(end)).unwrap(),
        }
    }

    #[test]
    fn test_inside_candidate_wins_over_near_one() {
        let product = Period::new(t(10), t(20)).unwrap();
        let candidates = vec![candidate("near", 12, 30), candidate("inside", 0, 40)];
        let attached = attach_nearest(&product, &candidates, Duration::seconds(5)).unwrap();
        assert_eq!(attached.key, "inside");
    }

    #[test]
    fn test_delta_bounds_coverage() {
        let product = Period::new(t(10), t(20)).unwrap();
        let candidates = vec![candidate("late", 15, 40)];
        assert!(attach_nearest(&product, &candidates, Duration::seconds(4)).is_none());
        assert_eq!(
            attach_nearest(&product, &candidates, Duration::seconds(5)).map(|c| c.key.as_str()),
            Some("late")
        );
    }

    #[test]
    fn test_equal_distance_keeps_first_candidate() {
        let product = Period::new(t(10), t(20)).unwrap();
        let candidates = vec![candidate("first", 0, 30), candidate("second", 5, 25)];
        let attached = attach_nearest(&product, &candidates, Duration::zero()).unwrap();
        assert_eq!(attached.key, "first");

        let reversed = vec![candidate("second", 5, 25), candidate("first", 0, 30)];
        let attached = attach_nearest(&product, &reversed, Duration::zero()).unwrap();
        assert_eq!(attached.key, "second");
    }

    #[test]
    fn test_temporal_distance() {
        let product = Period::new(t(10), t(20)).unwrap();
        assert_eq!(temporal_distance(&product, &Period::new(t(12), t(18)).unwrap()), Duration::seconds(4));
        assert_eq!(temporal_distance(&product, &Period::new(t(0), t(30)).unwrap()), Duration::zero());
    }
}
