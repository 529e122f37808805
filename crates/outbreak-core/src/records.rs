//! Raw surveillance observations
//!
//! The three record streams the engine consumes: hospital visits, pharmacy
//! sales and social-media posts. Timestamps are kept as the raw text received
//! from the source; turning them into calendar dates is the aggregator's job,
//! so a record with an unreadable timestamp can still be represented and
//! counted when it is excluded.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Clinical severity recorded on a hospital visit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Low" => Ok(Severity::Low),
            "Medium" => Ok(Severity::Medium),
            "High" => Ok(Severity::High),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sentiment label attached to a social post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "Positive",
            Sentiment::Neutral => "Neutral",
            Sentiment::Negative => "Negative",
        }
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Positive" => Ok(Sentiment::Positive),
            "Neutral" => Ok(Sentiment::Neutral),
            "Negative" => Ok(Sentiment::Negative),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A patient visit reported by a hospital
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HospitalVisit {
    pub patient_id: String,
    pub district: String,
    pub severity: Severity,
    /// Raw visit timestamp as received
    pub visit_date: String,
}

/// A pharmacy sale of a surveillance-relevant medicine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PharmacySale {
    pub pharmacy_id: String,
    pub district: String,
    pub qty_sold: u32,
    /// Raw sale timestamp as received
    pub sale_date: String,
}

/// A geotagged social-media post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialPost {
    pub post_id: String,
    pub district: String,
    pub sentiment: Sentiment,
    /// Raw post timestamp as received
    pub time_stamp: String,
}

/// Common view over the three record streams
pub trait Observation {
    fn district(&self) -> &str;
    fn raw_timestamp(&self) -> &str;

    /// Calendar date of the observation, if its timestamp is readable
    fn observed_on(&self) -> Option<NaiveDate> {
        parse_observation_date(self.raw_timestamp())
    }
}

impl Observation for HospitalVisit {
    fn district(&self) -> &str {
        &self.district
    }

    fn raw_timestamp(&self) -> &str {
        &self.visit_date
    }
}

impl Observation for PharmacySale {
    fn district(&self) -> &str {
        &self.district
    }

    fn raw_timestamp(&self) -> &str {
        &self.sale_date
    }
}

impl Observation for SocialPost {
    fn district(&self) -> &str {
        &self.district
    }

    fn raw_timestamp(&self) -> &str {
        &self.time_stamp
    }
}

/// All three record streams for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observations {
    pub hospital: Vec<HospitalVisit>,
    pub pharma: Vec<PharmacySale>,
    pub social: Vec<SocialPost>,
}

impl Observations {
    pub fn is_empty(&self) -> bool {
        self.hospital.is_empty() && self.pharma.is_empty() && self.social.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hospital.len() + self.pharma.len() + self.social.len()
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Parse a raw observation timestamp into a calendar date.
///
/// Zoned timestamps keep the date in their own offset; the time of day is
/// discarded. Returns `None` for anything unreadable.
pub fn parse_observation_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}
