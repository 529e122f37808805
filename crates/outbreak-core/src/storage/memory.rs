//! In-process store

use super::{AssessmentSink, ObservationSource};
use crate::error::StorageError;
use crate::records::Observations;
use crate::scoring::RiskAssessment;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct PublishedSet {
    version: u64,
    assessments: Vec<RiskAssessment>,
}

/// Holds observations and the published set in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    observations: Observations,
    published: Mutex<Option<PublishedSet>>,
}

impl MemoryStore {
    pub fn new(observations: Observations) -> Self {
        MemoryStore {
            observations,
            published: Mutex::new(None),
        }
    }

    pub fn observations_mut(&mut self) -> &mut Observations {
        &mut self.observations
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<PublishedSet>>, StorageError> {
        self.published
            .lock()
            .map_err(|_| StorageError::Unavailable("published set lock poisoned".into()))
    }
}

impl ObservationSource for MemoryStore {
    fn load_observations(&self) -> Result<Observations, StorageError> {
        Ok(self.observations.clone())
    }
}

impl AssessmentSink for MemoryStore {
    fn publish(&self, assessments: &[RiskAssessment]) -> Result<u64, StorageError> {
        let mut seen = BTreeSet::new();
        for a in assessments {
            if !seen.insert(a.district.as_str()) {
                return Err(StorageError::Unavailable(format!(
                    "duplicate assessment for district {}",
                    a.district
                )));
            }
        }

        let mut sorted = assessments.to_vec();
        sorted.sort_by(|a, b| a.district.cmp(&b.district));

        let mut published = self.lock()?;
        let version = published.as_ref().map_or(0, |set| set.version) + 1;
        *published = Some(PublishedSet {
            version,
            assessments: sorted,
        });
        Ok(version)
    }

    fn published_version(&self) -> Result<Option<u64>, StorageError> {
        Ok(self.lock()?.as_ref().map(|set| set.version))
    }

    fn published(&self) -> Result<Vec<RiskAssessment>, StorageError> {
        Ok(self
            .lock()?
            .as_ref()
            .map(|set| set.assessments.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures::assessment;

    #[test]
    fn test_publish_replaces_set() {
        let store = MemoryStore::default();
        assert_eq!(store.published_version().unwrap(), None);
        assert!(store.published().unwrap().is_empty());

        let v1 = store.publish(&[assessment("North", 0.2), assessment("East", 0.9)]).unwrap();
        assert_eq!(v1, 1);
        let districts: Vec<String> = store.published().unwrap().into_iter().map(|a| a.district).collect();
        assert_eq!(districts, vec!["East", "North"]);

        let v2 = store.publish(&[assessment("South", 0.5)]).unwrap();
        assert_eq!(v2, 2);
        assert_eq!(store.published().unwrap().len(), 1);
        assert!(store.for_district("North").unwrap().is_none());
        assert_eq!(store.for_district("South").unwrap().unwrap().outbreak_risk_score, 0.5);
    }

    #[test]
    fn test_duplicate_district_keeps_previous_set() {
        let store = MemoryStore::default();
        store.publish(&[assessment("North", 0.2)]).unwrap();

        let result = store.publish(&[assessment("East", 0.1), assessment("East", 0.3)]);
        assert!(result.is_err());
        assert_eq!(store.published_version().unwrap(), Some(1));
        assert_eq!(store.published().unwrap()[0].district, "North");
    }

    #[test]
    fn test_alerts_above_threshold() {
        let store = MemoryStore::default();
        store
            .publish(&[
                assessment("A", 0.7),
                assessment("B", 0.9),
                assessment("C", 0.69),
                assessment("D", 1.0),
            ])
            .unwrap();

        let alerts: Vec<String> = store
            .alerts_above(0.7, 50)
            .unwrap()
            .into_iter()
            .map(|a| a.district)
            .collect();
        assert_eq!(alerts, vec!["D", "B", "A"]);

        assert_eq!(store.alerts_above(0.7, 2).unwrap().len(), 2);
    }
}
