//! Offline anomaly-model training
//!
//! Fits the isolation forest on the dense (zero-filled) feature table and
//! saves it to the versioned store. Whether an existing model is reused is
//! decided by the store's [`RetrainPolicy`].

use crate::anomaly::{AnomalyModel, ForestParams};
use crate::error::{Result, SurveillanceError};
use crate::features::{AggregationMode, FeatureTable};
use crate::model_store::{ModelEntry, ModelStore, RetrainPolicy};
use chrono::{DateTime, Utc};

/// What [`ModelTrainer::ensure_model`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainOutcome {
    /// A new version was trained and saved
    Trained(ModelEntry),
    /// The existing latest version is still current
    Skipped(ModelEntry),
}

impl TrainOutcome {
    pub fn entry(&self) -> &ModelEntry {
        match self {
            TrainOutcome::Trained(entry) | TrainOutcome::Skipped(entry) => entry,
        }
    }
}

/// Trains anomaly models
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelTrainer {
    params: ForestParams,
}

impl ModelTrainer {
    pub fn new(params: ForestParams) -> Self {
        ModelTrainer { params }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Fit a model on a dense feature table
    pub fn train(&self, table: &FeatureTable, trained_at: DateTime<Utc>) -> Result<AnomalyModel> {
        if table.mode != AggregationMode::Dense {
            return Err(SurveillanceError::Training(
                "training requires a dense (zero-filled) feature table".into(),
            ));
        }
        if table.is_empty() {
            return Err(SurveillanceError::Training("no feature vectors to train on".into()));
        }

        tracing::info!(
            rows = table.len(),
            districts = table.districts().len(),
            dates = table.dates().len(),
            "training anomaly model"
        );
        AnomalyModel::fit(&table.feature_matrix(), self.params, trained_at)
    }

    /// Train and save unless the store already holds a current model.
    ///
    /// `force` trains regardless of the policy.
    pub fn ensure_model(
        &self,
        store: &ModelStore,
        table: &FeatureTable,
        policy: RetrainPolicy,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<TrainOutcome> {
        if !force {
            if let Some(entry) = store.latest_entry()? {
                if !policy.is_stale(&entry, now) {
                    tracing::info!(version = entry.version, ?policy, "existing model is current, skipping training");
                    return Ok(TrainOutcome::Skipped(entry));
                }
                tracing::info!(version = entry.version, ?policy, "existing model is stale");
            }
        }

        let model = self.train(table, now)?;
        Ok(TrainOutcome::Trained(store.save(&model)?))
    }
}
