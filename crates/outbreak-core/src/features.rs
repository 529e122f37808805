//! District-day feature aggregation
//!
//! Reduces the three raw record streams into one five-count feature vector
//! per (district, date). Every aggregation rule is a named function so it can
//! be tested on its own.
//!
//! Two modes exist on purpose:
//!
//! - [`AggregationMode::Sparse`] materialises only the (district, date) cells
//!   that have at least one observation. Prediction runs use it.
//! - [`AggregationMode::Dense`] materialises the full grid of every distinct
//!   date × every distinct district, zero-filling empty cells, so the anomaly
//!   model sees genuine zero-activity days. Training uses it.
//!
//! The modes stay separate even though it means training and inference see
//! slightly different populations.

use crate::records::{HospitalVisit, Observation, Observations, PharmacySale, Sentiment, Severity, SocialPost};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Number of features in a district-day vector
pub const FEATURE_COUNT: usize = 5;

/// Feature names in vector order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "hospitalCaseCount",
    "severeCaseCount",
    "pharmaSalesCount",
    "socialPostsCount",
    "negativePostsCount",
];

/// How the aggregator lays out the output table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationMode {
    /// Only observed (district, date) cells
    Sparse,
    /// Full distinct-dates × distinct-districts grid, zero-filled
    Dense,
}

/// Key of a feature vector
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DistrictDay {
    pub district: String,
    pub date: NaiveDate,
}

/// Five-count summary of one district's activity on one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistrictDayFeatureVector {
    pub district: String,
    pub date: NaiveDate,
    pub hospital_case_count: u64,
    pub severe_case_count: u64,
    pub pharma_sales_count: u64,
    pub social_posts_count: u64,
    pub negative_posts_count: u64,
}

impl DistrictDayFeatureVector {
    /// An all-zero vector for a key
    pub fn zero(district: impl Into<String>, date: NaiveDate) -> Self {
        DistrictDayFeatureVector {
            district: district.into(),
            date,
            hospital_case_count: 0,
            severe_case_count: 0,
            pharma_sales_count: 0,
            social_posts_count: 0,
            negative_posts_count: 0,
        }
    }

    pub fn key(&self) -> DistrictDay {
        DistrictDay {
            district: self.district.clone(),
            date: self.date,
        }
    }

    /// Raw counts in [`FEATURE_NAMES`] order; no scaling is applied
    pub fn to_features(&self) -> [f64; FEATURE_COUNT] {
        [
            self.hospital_case_count as f64,
            self.severe_case_count as f64,
            self.pharma_sales_count as f64,
            self.social_posts_count as f64,
            self.negative_posts_count as f64,
        ]
    }
}

/// Per-stream count of records excluded because their timestamp was unreadable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationReport {
    pub dropped_hospital: usize,
    pub dropped_pharma: usize,
    pub dropped_social: usize,
}

impl AggregationReport {
    pub fn total_dropped(&self) -> usize {
        self.dropped_hospital + self.dropped_pharma + self.dropped_social
    }
}

/// Aggregated feature vectors plus the drop report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub mode: AggregationMode,
    vectors: Vec<DistrictDayFeatureVector>,
    report: AggregationReport,
}

impl FeatureTable {
    /// Vectors ordered by (district, date)
    pub fn vectors(&self) -> &[DistrictDayFeatureVector] {
        &self.vectors
    }

    pub fn into_vectors(self) -> Vec<DistrictDayFeatureVector> {
        self.vectors
    }

    pub fn report(&self) -> &AggregationReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Distinct districts in the table, sorted
    pub fn districts(&self) -> Vec<&str> {
        let set: BTreeSet<&str> = self.vectors.iter().map(|v| v.district.as_str()).collect();
        set.into_iter().collect()
    }

    /// Distinct dates in the table, sorted
    pub fn dates(&self) -> Vec<NaiveDate> {
        let set: BTreeSet<NaiveDate> = self.vectors.iter().map(|v| v.date).collect();
        set.into_iter().collect()
    }

    /// Vectors grouped per district, each group sorted by date
    pub fn district_histories(&self) -> BTreeMap<&str, Vec<&DistrictDayFeatureVector>> {
        let mut groups: BTreeMap<&str, Vec<&DistrictDayFeatureVector>> = BTreeMap::new();
        for vector in &self.vectors {
            groups.entry(vector.district.as_str()).or_default().push(vector);
        }
        for history in groups.values_mut() {
            history.sort_by_key(|v| v.date);
        }
        groups
    }

    /// Feature matrix in row order, for model training
    pub fn feature_matrix(&self) -> Vec<[f64; FEATURE_COUNT]> {
        self.vectors.iter().map(|v| v.to_features()).collect()
    }
}

/// Hospital case count: one per visit
pub fn hospital_case_count(visits: &[&HospitalVisit]) -> u64 {
    visits.len() as u64
}

/// Severe case count: visits with severity High
pub fn severe_case_count(visits: &[&HospitalVisit]) -> u64 {
    visits.iter().filter(|v| v.severity == Severity::High).count() as u64
}

/// Pharmacy sales count: total quantity sold
pub fn pharma_sales_count(sales: &[&PharmacySale]) -> u64 {
    sales.iter().map(|s| u64::from(s.qty_sold)).sum()
}

/// Social posts count: one per post
pub fn social_posts_count(posts: &[&SocialPost]) -> u64 {
    posts.len() as u64
}

/// Negative posts count: posts with sentiment Negative
pub fn negative_posts_count(posts: &[&SocialPost]) -> u64 {
    posts.iter().filter(|p| p.sentiment == Sentiment::Negative).count() as u64
}

/// Bucket records by (district, date), returning the number of records dropped
fn group_by_key<T: Observation>(records: &[T]) -> (BTreeMap<DistrictDay, Vec<&T>>, usize) {
    let mut groups: BTreeMap<DistrictDay, Vec<&T>> = BTreeMap::new();
    let mut dropped = 0;

    for record in records {
        match record.observed_on() {
            Some(date) => {
                let key = DistrictDay {
                    district: record.district().to_string(),
                    date,
                };
                groups.entry(key).or_default().push(record);
            }
            None => dropped += 1,
        }
    }

    (groups, dropped)
}

/// Aggregate all three streams into a feature table
pub fn aggregate(
    hospital: &[HospitalVisit],
    pharma: &[PharmacySale],
    social: &[SocialPost],
    mode: AggregationMode,
) -> FeatureTable {
    let (hospital_groups, dropped_hospital) = group_by_key(hospital);
    let (pharma_groups, dropped_pharma) = group_by_key(pharma);
    let (social_groups, dropped_social) = group_by_key(social);

    // Outer join of the three partial aggregates
    let mut cells: BTreeMap<DistrictDay, DistrictDayFeatureVector> = BTreeMap::new();

    for (key, visits) in &hospital_groups {
        let cell = cells
            .entry(key.clone())
            .or_insert_with(|| DistrictDayFeatureVector::zero(key.district.clone(), key.date));
        cell.hospital_case_count = hospital_case_count(visits);
        cell.severe_case_count = severe_case_count(visits);
    }

    for (key, sales) in &pharma_groups {
        let cell = cells
            .entry(key.clone())
            .or_insert_with(|| DistrictDayFeatureVector::zero(key.district.clone(), key.date));
        cell.pharma_sales_count = pharma_sales_count(sales);
    }

    for (key, posts) in &social_groups {
        let cell = cells
            .entry(key.clone())
            .or_insert_with(|| DistrictDayFeatureVector::zero(key.district.clone(), key.date));
        cell.social_posts_count = social_posts_count(posts);
        cell.negative_posts_count = negative_posts_count(posts);
    }

    if mode == AggregationMode::Dense {
        let districts: BTreeSet<String> = cells.keys().map(|k| k.district.clone()).collect();
        let dates: BTreeSet<NaiveDate> = cells.keys().map(|k| k.date).collect();

        for district in &districts {
            for date in &dates {
                let key = DistrictDay {
                    district: district.clone(),
                    date: *date,
                };
                cells
                    .entry(key)
                    .or_insert_with(|| DistrictDayFeatureVector::zero(district.clone(), *date));
            }
        }
    }

    let report = AggregationReport {
        dropped_hospital,
        dropped_pharma,
        dropped_social,
    };

    if report.total_dropped() > 0 {
        tracing::warn!(
            dropped_hospital,
            dropped_pharma,
            dropped_social,
            "excluded records with unreadable timestamps"
        );
    }

    FeatureTable {
        mode,
        vectors: cells.into_values().collect(),
        report,
    }
}

/// Aggregate a full observation batch
pub fn aggregate_observations(observations: &Observations, mode: AggregationMode) -> FeatureTable {
    aggregate(&observations.hospital, &observations.pharma, &observations.social, mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visit(district: &str, ts: &str, severity: Severity) -> HospitalVisit {
        HospitalVisit {
            patient_id: format!("P-{}-{}", district, ts),
            district: district.into(),
            severity,
            visit_date: ts.into(),
        }
    }

    fn sale(district: &str, ts: &str, qty: u32) -> PharmacySale {
        PharmacySale {
            pharmacy_id: "PH-1".into(),
            district: district.into(),
            qty_sold: qty,
            sale_date: ts.into(),
        }
    }

    fn post(district: &str, ts: &str, sentiment: Sentiment) -> SocialPost {
        SocialPost {
            post_id: format!("S-{}", ts),
            district: district.into(),
            sentiment,
            time_stamp: ts.into(),
        }
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    #[test]
    fn test_named_rules() {
        let a = visit("North", "2025-06-01", Severity::High);
        let b = visit("North", "2025-06-01", Severity::Low);
        let c = visit("North", "2025-06-01", Severity::High);
        let visits = vec![&a, &b, &c];
        assert_eq!(hospital_case_count(&visits), 3);
        assert_eq!(severe_case_count(&visits), 2);

        let s1 = sale("North", "2025-06-01", 12);
        let s2 = sale("North", "2025-06-01", 30);
        assert_eq!(pharma_sales_count(&[&s1, &s2]), 42);

        let p1 = post("North", "2025-06-01", Sentiment::Negative);
        let p2 = post("North", "2025-06-01", Sentiment::Neutral);
        assert_eq!(social_posts_count(&[&p1, &p2]), 2);
        assert_eq!(negative_posts_count(&[&p1, &p2]), 1);
    }

    #[test]
    fn test_sparse_outer_join() {
        let hospital = vec![
            visit("North", "2025-06-01T09:00:00", Severity::High),
            visit("North", "2025-06-01T17:30:00", Severity::Medium),
        ];
        let pharma = vec![sale("South", "2025-06-02T11:00:00", 7)];
        let social = vec![post("North", "2025-06-02T08:00:00", Sentiment::Negative)];

        let table = aggregate(&hospital, &pharma, &social, AggregationMode::Sparse);
        assert_eq!(table.len(), 3);

        let v = table.vectors();
        assert_eq!(v[0].district, "North");
        assert_eq!(v[0].date, date(1));
        assert_eq!(v[0].hospital_case_count, 2);
        assert_eq!(v[0].severe_case_count, 1);
        assert_eq!(v[0].pharma_sales_count, 0);

        assert_eq!(v[1].district, "North");
        assert_eq!(v[1].date, date(2));
        assert_eq!(v[1].hospital_case_count, 0);
        assert_eq!(v[1].negative_posts_count, 1);

        assert_eq!(v[2].district, "South");
        assert_eq!(v[2].pharma_sales_count, 7);
    }

    #[test]
    fn test_dense_fills_grid_with_zeros() {
        let hospital = vec![visit("North", "2025-06-01", Severity::Low)];
        let pharma = vec![sale("South", "2025-06-03", 4)];
        let social = vec![post("East", "2025-06-02", Sentiment::Positive)];

        let table = aggregate(&hospital, &pharma, &social, AggregationMode::Dense);
        assert_eq!(table.len(), 3 * 3);
        assert_eq!(table.districts(), vec!["East", "North", "South"]);
        assert_eq!(table.dates(), vec![date(1), date(2), date(3)]);

        let south_day1 = table
            .vectors()
            .iter()
            .find(|v| v.district == "South" && v.date == date(1))
            .unwrap();
        assert_eq!(south_day1, &DistrictDayFeatureVector::zero("South", date(1)));
    }

    #[test]
    fn test_dense_uses_observed_dates_only() {
        // Gap on the 2nd is not materialised: only distinct observed dates form the grid
        let hospital = vec![
            visit("North", "2025-06-01", Severity::Low),
            visit("North", "2025-06-03", Severity::Low),
        ];
        let table = aggregate(&hospital, &[], &[], AggregationMode::Dense);
        assert_eq!(table.dates(), vec![date(1), date(3)]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_unparseable_timestamps_are_counted() {
        let hospital = vec![
            visit("North", "2025-06-01", Severity::High),
            visit("North", "not-a-date", Severity::High),
        ];
        let pharma = vec![sale("North", "", 5)];
        let social = vec![
            post("North", "06/01/2025 at noon", Sentiment::Negative),
            post("North", "2025-06-01", Sentiment::Negative),
        ];

        let table = aggregate(&hospital, &pharma, &social, AggregationMode::Sparse);
        assert_eq!(
            table.report(),
            &AggregationReport {
                dropped_hospital: 1,
                dropped_pharma: 1,
                dropped_social: 1,
            }
        );
        assert_eq!(table.report().total_dropped(), 3);
        assert_eq!(table.len(), 1);
        assert_eq!(table.vectors()[0].hospital_case_count, 1);
        assert_eq!(table.vectors()[0].pharma_sales_count, 0);
    }

    #[test]
    fn test_district_histories_sorted() {
        let hospital = vec![
            visit("North", "2025-06-03", Severity::Low),
            visit("North", "2025-06-01", Severity::Low),
            visit("South", "2025-06-02", Severity::Low),
        ];
        let table = aggregate(&hospital, &[], &[], AggregationMode::Sparse);
        let histories = table.district_histories();

        let north: Vec<NaiveDate> = histories["North"].iter().map(|v| v.date).collect();
        assert_eq!(north, vec![date(1), date(3)]);
        assert_eq!(histories["South"].len(), 1);
    }

    #[test]
    fn test_empty_input() {
        let table = aggregate(&[], &[], &[], AggregationMode::Dense);
        assert!(table.is_empty());
        assert_eq!(table.report().total_dropped(), 0);
    }
}
