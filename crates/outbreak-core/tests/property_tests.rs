//! Property-Based Tests for aggregation and scoring
//!
//! These tests verify the invariants the engine relies on:
//! - Conservation of record counts through aggregation
//! - Dense grid completeness
//! - Score bounds and alert-level partition
//! - Aggregation idempotence
//!
//! Uses proptest for randomized property testing with shrinking.

use chrono::{Duration, NaiveDate};
use outbreak_core::scoring::score;
use outbreak_core::{
    aggregate, AggregationMode, AlertLevel, DistrictDayFeatureVector, HospitalVisit, PharmacySale, Sentiment,
    Severity, SocialPost,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Timestamp text plus whether it is readable
fn timestamp() -> impl Strategy<Value = (String, bool)> {
    prop_oneof![
        4 => (1u32..=28, 0u32..24).prop_map(|(d, h)| (format!("2025-02-{:02}T{:02}:30:00", d, h), true)),
        2 => (1u32..=28).prop_map(|d| (format!("2025-02-{:02}", d), true)),
        1 => "[a-z ]{0,8}".prop_map(|s| (s, false)),
    ]
}

fn district() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["Cachar", "Jorhat", "Sivasagar"]).prop_map(String::from)
}

fn severity() -> impl Strategy<Value = Severity> {
    prop_oneof![Just(Severity::Low), Just(Severity::Medium), Just(Severity::High)]
}

fn sentiment() -> impl Strategy<Value = Sentiment> {
    prop_oneof![Just(Sentiment::Positive), Just(Sentiment::Neutral), Just(Sentiment::Negative)]
}

fn visits() -> impl Strategy<Value = Vec<(HospitalVisit, bool)>> {
    prop::collection::vec((district(), severity(), timestamp()), 0..60).prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (district, severity, (ts, valid)))| {
                let visit = HospitalVisit {
                    patient_id: format!("P{}", i),
                    district,
                    severity,
                    visit_date: ts,
                };
                (visit, valid)
            })
            .collect()
    })
}

fn sales() -> impl Strategy<Value = Vec<(PharmacySale, bool)>> {
    prop::collection::vec((district(), 0u32..500, timestamp()), 0..40).prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (district, qty_sold, (ts, valid)))| {
                let sale = PharmacySale {
                    pharmacy_id: format!("PH{}", i),
                    district,
                    qty_sold,
                    sale_date: ts,
                };
                (sale, valid)
            })
            .collect()
    })
}

fn posts() -> impl Strategy<Value = Vec<(SocialPost, bool)>> {
    prop::collection::vec((district(), sentiment(), timestamp()), 0..60).prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (district, sentiment, (ts, valid)))| {
                let post = SocialPost {
                    post_id: format!("S{}", i),
                    district,
                    sentiment,
                    time_stamp: ts,
                };
                (post, valid)
            })
            .collect()
    })
}

fn split<T>(rows: Vec<(T, bool)>) -> (Vec<T>, Vec<bool>) {
    rows.into_iter().unzip()
}

fn history(counts: &[(u64, u64)]) -> Vec<DistrictDayFeatureVector> {
    let start = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
    counts
        .iter()
        .enumerate()
        .map(|(i, &(cases, negative))| DistrictDayFeatureVector {
            district: "Cachar".into(),
            date: start + Duration::days(i as i64),
            hospital_case_count: cases,
            severe_case_count: cases / 2,
            pharma_sales_count: cases * 2,
            social_posts_count: negative + 1,
            negative_posts_count: negative,
        })
        .collect()
}

proptest! {
    /// Every readable record lands in exactly one cell; unreadable ones are counted
    #[test]
    fn aggregation_conserves_counts(hospital in visits(), pharma in sales(), social in posts()) {
        let (hospital, hospital_valid) = split(hospital);
        let (pharma, pharma_valid) = split(pharma);
        let (social, social_valid) = split(social);

        for mode in [AggregationMode::Sparse, AggregationMode::Dense] {
            let table = aggregate(&hospital, &pharma, &social, mode);
            let v = table.vectors();

            let valid_visits = hospital.iter().zip(&hospital_valid).filter(|(_, ok)| **ok);
            let expected_cases = valid_visits.clone().count() as u64;
            let expected_severe = valid_visits.filter(|(h, _)| h.severity == Severity::High).count() as u64;
            let expected_qty: u64 = pharma.iter().zip(&pharma_valid).filter(|(_, ok)| **ok).map(|(s, _)| u64::from(s.qty_sold)).sum();
            let valid_posts = social.iter().zip(&social_valid).filter(|(_, ok)| **ok);
            let expected_posts = valid_posts.clone().count() as u64;
            let expected_negative = valid_posts.filter(|(p, _)| p.sentiment == Sentiment::Negative).count() as u64;

            prop_assert_eq!(v.iter().map(|x| x.hospital_case_count).sum::<u64>(), expected_cases);
            prop_assert_eq!(v.iter().map(|x| x.severe_case_count).sum::<u64>(), expected_severe);
            prop_assert_eq!(v.iter().map(|x| x.pharma_sales_count).sum::<u64>(), expected_qty);
            prop_assert_eq!(v.iter().map(|x| x.social_posts_count).sum::<u64>(), expected_posts);
            prop_assert_eq!(v.iter().map(|x| x.negative_posts_count).sum::<u64>(), expected_negative);

            let report = table.report();
            prop_assert_eq!(report.dropped_hospital, hospital_valid.iter().filter(|ok| !**ok).count());
            prop_assert_eq!(report.dropped_pharma, pharma_valid.iter().filter(|ok| !**ok).count());
            prop_assert_eq!(report.dropped_social, social_valid.iter().filter(|ok| !**ok).count());
        }
    }

    /// Dense tables hold exactly one vector per (district, date) in the grid
    #[test]
    fn dense_grid_is_complete(hospital in visits(), pharma in sales(), social in posts()) {
        let (hospital, _) = split(hospital);
        let (pharma, _) = split(pharma);
        let (social, _) = split(social);

        let table = aggregate(&hospital, &pharma, &social, AggregationMode::Dense);
        let keys: BTreeSet<_> = table.vectors().iter().map(|v| v.key()).collect();

        prop_assert_eq!(keys.len(), table.len());
        prop_assert_eq!(table.len(), table.districts().len() * table.dates().len());

        let sparse = aggregate(&hospital, &pharma, &social, AggregationMode::Sparse);
        prop_assert!(sparse.len() <= table.len());
        prop_assert_eq!(sparse.districts(), table.districts());
        prop_assert_eq!(sparse.dates(), table.dates());
    }

    /// Aggregating the same input twice gives byte-identical output
    #[test]
    fn aggregation_is_idempotent(hospital in visits(), pharma in sales(), social in posts()) {
        let (hospital, _) = split(hospital);
        let (pharma, _) = split(pharma);
        let (social, _) = split(social);

        let first = aggregate(&hospital, &pharma, &social, AggregationMode::Dense);
        let second = aggregate(&hospital, &pharma, &social, AggregationMode::Dense);
        prop_assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    /// Scores stay in [0, 1] with two decimals and agree with their alert level
    #[test]
    fn score_is_bounded(
        counts in prop::collection::vec((0u64..200, 0u64..50), 1..20),
        anomalous in any::<bool>(),
        forecast in -50.0f64..1000.0,
    ) {
        let h = history(&counts);
        let refs: Vec<&DistrictDayFeatureVector> = h.iter().collect();
        let a = score(&refs, anomalous, forecast).unwrap();

        prop_assert!((0.0..=1.0).contains(&a.outbreak_risk_score), "score {}", a.outbreak_risk_score);
        prop_assert!((a.outbreak_risk_score * 100.0 - (a.outbreak_risk_score * 100.0).round()).abs() < 1e-9);
        prop_assert_eq!(a.alert_level, AlertLevel::from_score(a.outbreak_risk_score));
        if !anomalous {
            prop_assert!(a.outbreak_risk_score <= 0.1);
        }
    }

    /// Every score maps to exactly one level, monotonically
    #[test]
    fn alert_levels_partition(x in 0.0f64..=1.0, y in 0.0f64..=1.0) {
        let level = AlertLevel::from_score(x);
        let expected = if x > 0.7 {
            AlertLevel::High
        } else if x > 0.4 {
            AlertLevel::Medium
        } else {
            AlertLevel::Low
        };
        prop_assert_eq!(level, expected);

        if x <= y {
            prop_assert!(AlertLevel::from_score(x) <= AlertLevel::from_score(y));
        }
    }
}
