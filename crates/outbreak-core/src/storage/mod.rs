//! Observation sources and assessment sinks
//!
//! A run reads all three record streams from an [`ObservationSource`] and
//! replaces the published assessment set of an [`AssessmentSink`] in one
//! atomic step. Readers of the sink see either the previous set or the new
//! one, never a mix, and a failed publish leaves the previous set in place.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::{ConnectionTarget, SqliteStore};

use crate::error::StorageError;
use crate::records::Observations;
use crate::scoring::RiskAssessment;

/// Default score threshold for alert queries
pub const DEFAULT_ALERT_THRESHOLD: f64 = 0.7;
/// Default row cap for alert queries
pub const DEFAULT_ALERT_LIMIT: usize = 50;

/// Where raw observations come from
pub trait ObservationSource {
    /// Load every observation currently held by the source
    fn load_observations(&self) -> Result<Observations, StorageError>;
}

/// Where assessments are published
pub trait AssessmentSink {
    /// Atomically replace the published set, returning the new set version
    fn publish(&self, assessments: &[RiskAssessment]) -> Result<u64, StorageError>;

    /// Version of the currently published set, if anything was published
    fn published_version(&self) -> Result<Option<u64>, StorageError>;

    /// Currently published assessments, ordered by district
    fn published(&self) -> Result<Vec<RiskAssessment>, StorageError>;

    /// Published assessments scoring at or above `threshold`, highest first
    fn alerts_above(&self, threshold: f64, limit: usize) -> Result<Vec<RiskAssessment>, StorageError> {
        let mut alerts: Vec<RiskAssessment> = self
            .published()?
            .into_iter()
            .filter(|a| a.outbreak_risk_score >= threshold)
            .collect();
        sort_alerts(&mut alerts);
        alerts.truncate(limit);
        Ok(alerts)
    }

    /// Published assessment for one district
    fn for_district(&self, district: &str) -> Result<Option<RiskAssessment>, StorageError> {
        Ok(self.published()?.into_iter().find(|a| a.district == district))
    }
}

/// Highest score first; ties by district
pub(crate) fn sort_alerts(alerts: &mut [RiskAssessment]) {
    alerts.sort_by(|a, b| {
        b.outbreak_risk_score
            .total_cmp(&a.outbreak_risk_score)
            .then_with(|| a.district.cmp(&b.district))
    });
}
