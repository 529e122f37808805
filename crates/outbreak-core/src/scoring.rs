//! Outbreak risk scoring
//!
//! A deterministic additive heuristic over a district's most recent day and
//! the days just before it. Nothing here is learned: thresholds, the 1.5×
//! multiplier and rounding are fixed so that scores are reproducible.
//!
//! | Signal                                         | Weight |
//! |------------------------------------------------|--------|
//! | Anomaly model flags the latest day             | +0.5   |
//! | ...and hospital cases > 1.5 × trailing mean    | +0.2   |
//! | ...and negative posts > 1.5 × trailing mean    | +0.2   |
//! | Forecast > 1.5 × latest hospital cases         | +0.1   |
//!
//! The score is clamped to [0, 1] and bucketed: above 0.7 is High, above 0.4
//! up to and including 0.7 is Medium, everything else is Low.

use crate::features::DistrictDayFeatureVector;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Contribution of an anomalous latest day
pub const ANOMALY_WEIGHT: f64 = 0.5;
/// Contribution of a hospital case rise on an anomalous day
pub const CASE_RISE_WEIGHT: f64 = 0.2;
/// Contribution of a negative-sentiment rise on an anomalous day
pub const SOCIAL_RISE_WEIGHT: f64 = 0.2;
/// Contribution of a forecast rise
pub const FORECAST_RISE_WEIGHT: f64 = 0.1;
/// Ratio over baseline that counts as a rise
pub const RISE_MULTIPLIER: f64 = 1.5;
/// Days in the trailing baseline window
pub const TRAILING_WINDOW_DAYS: usize = 7;

const HIGH_ABOVE: f64 = 0.7;
const MEDIUM_ABOVE: f64 = 0.4;

/// Discrete alert bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertLevel {
    Low,
    Medium,
    High,
}

impl AlertLevel {
    /// Bucket a clamped score
    pub fn from_score(score: f64) -> Self {
        if score > HIGH_ABOVE {
            AlertLevel::High
        } else if score > MEDIUM_ABOVE {
            AlertLevel::Medium
        } else {
            AlertLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Low => "Low",
            AlertLevel::Medium => "Medium",
            AlertLevel::High => "High",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(AlertLevel::Low),
            "Medium" => Ok(AlertLevel::Medium),
            "High" => Ok(AlertLevel::High),
            other => Err(other.to_string()),
        }
    }
}

/// Per-district output of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub district: String,
    /// Most recent day present for the district
    pub date: NaiveDate,
    pub hospital_case_count: u64,
    pub severe_case_count: u64,
    pub pharma_sales_count: u64,
    pub social_posts_count: u64,
    pub negative_posts_count: u64,
    /// Clamped score rounded to two decimals
    pub outbreak_risk_score: f64,
    pub alert_level: AlertLevel,
    pub explanation: String,
    /// Whether the anomaly model flagged the latest day
    pub anomalous: bool,
    /// Forecast hospital cases at the horizon
    pub forecast_cases: f64,
}

/// Round to two decimal places
pub fn round_score(score: f64) -> f64 {
    (score * 100.0).round() / 100.0
}

/// Mean of a field over up to [`TRAILING_WINDOW_DAYS`] days before the latest day.
///
/// Returns `None` when the history has no earlier day.
pub fn trailing_average<F>(history: &[&DistrictDayFeatureVector], field: F) -> Option<f64>
where
    F: Fn(&DistrictDayFeatureVector) -> u64,
{
    let before_latest = history.len().checked_sub(1)?;
    if before_latest == 0 {
        return None;
    }
    let start = before_latest.saturating_sub(TRAILING_WINDOW_DAYS);
    let window = &history[start..before_latest];
    let total: u64 = window.iter().map(|v| field(*v)).sum();
    Some(total as f64 / window.len() as f64)
}

/// Score one district.
///
/// `history` must be sorted by date with the latest day last. Returns `None`
/// for an empty history.
pub fn score(
    history: &[&DistrictDayFeatureVector],
    is_anomalous: bool,
    forecast_value: f64,
) -> Option<RiskAssessment> {
    let latest = *history.last()?;
    let latest_cases = latest.hospital_case_count as f64;
    let latest_negative = latest.negative_posts_count as f64;

    let mut score: f64 = 0.0;
    let mut explanation;

    if is_anomalous {
        score += ANOMALY_WEIGHT;
        explanation = String::from("Anomalous spike detected.");

        // A zero baseline means no measurable rise
        if let Some(avg) = trailing_average(history, |v| v.hospital_case_count) {
            if avg > 0.0 && latest_cases > avg * RISE_MULTIPLIER {
                score += CASE_RISE_WEIGHT;
                let rise = ((latest_cases - avg) / avg * 100.0).round_ties_even();
                explanation.push_str(&format!(" ({} cases, {}% rise)", latest.hospital_case_count, rise));
            }
        }

        if let Some(avg) = trailing_average(history, |v| v.negative_posts_count) {
            if latest_negative > avg * RISE_MULTIPLIER {
                score += SOCIAL_RISE_WEIGHT;
                explanation.push_str(" and negative social posts spike");
            }
        }
    } else {
        explanation = String::from("Normal trends detected.");
    }

    if forecast_value > latest_cases * RISE_MULTIPLIER {
        score += FORECAST_RISE_WEIGHT;
        explanation.push_str(&format!(
            " - Forecast predicts rise to {} cases.",
            forecast_value.round_ties_even()
        ));
    }

    let score = score.clamp(0.0, 1.0);
    let alert_level = AlertLevel::from_score(score);

    Some(RiskAssessment {
        district: latest.district.clone(),
        date: latest.date,
        hospital_case_count: latest.hospital_case_count,
        severe_case_count: latest.severe_case_count,
        pharma_sales_count: latest.pharma_sales_count,
        social_posts_count: latest.social_posts_count,
        negative_posts_count: latest.negative_posts_count,
        outbreak_risk_score: round_score(score),
        alert_level,
        explanation,
        anomalous: is_anomalous,
        forecast_cases: forecast_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn history(cases: &[u64], negative: &[u64]) -> Vec<DistrictDayFeatureVector> {
        let start = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        cases
            .iter()
            .zip(negative)
            .enumerate()
            .map(|(i, (&c, &n))| DistrictDayFeatureVector {
                district: "Dhubri".into(),
                date: start + Duration::days(i as i64),
                hospital_case_count: c,
                severe_case_count: c / 4,
                pharma_sales_count: c * 3,
                social_posts_count: n * 2,
                negative_posts_count: n,
            })
            .collect()
    }

    fn refs(h: &[DistrictDayFeatureVector]) -> Vec<&DistrictDayFeatureVector> {
        h.iter().collect()
    }

    #[test]
    fn test_alert_level_boundaries() {
        assert_eq!(AlertLevel::from_score(0.0), AlertLevel::Low);
        assert_eq!(AlertLevel::from_score(0.4), AlertLevel::Low);
        assert_eq!(AlertLevel::from_score(0.41), AlertLevel::Medium);
        assert_eq!(AlertLevel::from_score(0.7), AlertLevel::Medium);
        assert_eq!(AlertLevel::from_score(0.71), AlertLevel::High);
        assert_eq!(AlertLevel::from_score(1.0), AlertLevel::High);
    }

    #[test]
    fn test_anomaly_with_case_and_social_rise() {
        let h = history(&[20, 20, 20, 20, 20, 20, 20, 60], &[2, 2, 2, 2, 2, 2, 2, 10]);
        let a = score(&refs(&h), true, 40.0).unwrap();

        assert_eq!(a.outbreak_risk_score, 0.9);
        assert_eq!(a.alert_level, AlertLevel::High);
        assert_eq!(
            a.explanation,
            "Anomalous spike detected. (60 cases, 200% rise) and negative social posts spike"
        );
        assert_eq!(a.hospital_case_count, 60);
        assert_eq!(a.negative_posts_count, 10);
        assert_eq!(a.date, h[7].date);
    }

    #[test]
    fn test_normal_day() {
        let h = history(&[10, 11, 9, 10], &[1, 0, 1, 1]);
        let a = score(&refs(&h), false, 12.0).unwrap();

        assert_eq!(a.outbreak_risk_score, 0.0);
        assert_eq!(a.alert_level, AlertLevel::Low);
        assert_eq!(a.explanation, "Normal trends detected.");
    }

    #[test]
    fn test_zero_baseline_skips_case_rise() {
        let h = history(&[0, 0, 0, 0, 0, 0, 0, 5], &[0, 0, 0, 0, 0, 0, 0, 0]);
        let a = score(&refs(&h), true, 5.0).unwrap();

        assert_eq!(a.outbreak_risk_score, 0.5);
        assert_eq!(a.alert_level, AlertLevel::Medium);
        assert_eq!(a.explanation, "Anomalous spike detected.");
    }

    #[test]
    fn test_forecast_rise_without_anomaly() {
        let h = history(&[10, 10, 10, 10], &[0, 0, 0, 0]);
        let a = score(&refs(&h), false, 16.4).unwrap();

        assert_eq!(a.outbreak_risk_score, 0.1);
        assert_eq!(a.alert_level, AlertLevel::Low);
        assert_eq!(
            a.explanation,
            "Normal trends detected. - Forecast predicts rise to 16 cases."
        );
    }

    #[test]
    fn test_all_signals_clamp_to_one() {
        let h = history(&[10, 10, 10, 40], &[1, 1, 1, 9]);
        let a = score(&refs(&h), true, 100.0).unwrap();

        assert_eq!(a.outbreak_risk_score, 1.0);
        assert_eq!(a.alert_level, AlertLevel::High);
        assert!(a.explanation.ends_with(" - Forecast predicts rise to 100 cases."));
    }

    #[test]
    fn test_anomaly_and_case_rise_is_medium() {
        // 0.5 + 0.2 sits exactly on the Medium/High boundary
        let h = history(&[10, 10, 10, 30], &[3, 3, 3, 3]);
        let a = score(&refs(&h), true, 30.0).unwrap();

        assert_eq!(a.outbreak_risk_score, 0.7);
        assert_eq!(a.alert_level, AlertLevel::Medium);
    }

    #[test]
    fn test_trailing_window_limits_to_seven_days() {
        // Old 100s fall outside the window preceding the latest day
        let cases = [100, 100, 1, 1, 1, 1, 1, 1, 1, 5];
        let h = history(&cases, &[0; 10]);
        let r = refs(&h);
        assert_eq!(trailing_average(&r, |v| v.hospital_case_count), Some(1.0));
    }

    #[test]
    fn test_trailing_window_shorter_history() {
        let h = history(&[4, 8, 30], &[0, 0, 0]);
        let r = refs(&h);
        assert_eq!(trailing_average(&r, |v| v.hospital_case_count), Some(6.0));
        assert_eq!(trailing_average(&r[..1], |v| v.hospital_case_count), None);
        assert_eq!(trailing_average(&[], |v| v.hospital_case_count), None);
    }

    #[test]
    fn test_single_day_history_has_no_baseline() {
        let h = history(&[50], &[20]);
        let a = score(&refs(&h), true, 10.0).unwrap();
        assert_eq!(a.outbreak_risk_score, 0.5);
        assert_eq!(a.explanation, "Anomalous spike detected.");
    }

    #[test]
    fn test_rise_percentage_rounding() {
        // avg 8, latest 13 -> 62.5% rounds half to even
        let h = history(&[8, 8, 13], &[0, 0, 0]);
        let a = score(&refs(&h), true, 0.0).unwrap();
        assert!(a.explanation.contains("(13 cases, 62% rise)"), "{}", a.explanation);
    }

    #[test]
    fn test_empty_history() {
        assert!(score(&[], true, 1.0).is_none());
    }
}
