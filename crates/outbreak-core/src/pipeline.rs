//! Scoring runs
//!
//! [`assess`] is the pure core: observations plus a classifier and a
//! forecaster in, one assessment per district out. It reads no clock and
//! touches no storage, so any scheduler (or a test) can drive it.
//!
//! [`run_once`] wires a source, the model store and a sink around it and
//! never returns an error. Every outcome becomes a [`RunStatus`] so a
//! scheduling loop can simply call it again on its next tick.

use crate::anomaly::AnomalyClassifier;
use crate::config::EngineConfig;
use crate::error::{Result, SurveillanceError};
use crate::features::{aggregate_observations, AggregationMode, AggregationReport, DistrictDayFeatureVector};
use crate::forecast::{Forecaster, TrendForecaster};
use crate::model_store::ModelStore;
use crate::records::Observations;
use crate::scoring::{self, AlertLevel, RiskAssessment};
use crate::storage::{AssessmentSink, ObservationSource};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Output of [`assess`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    /// One per district, ordered by district
    pub assessments: Vec<RiskAssessment>,
    pub report: AggregationReport,
}

impl Assessment {
    /// Number of assessments at each alert level (Low, Medium, High)
    pub fn level_counts(&self) -> (usize, usize, usize) {
        self.assessments.iter().fold((0, 0, 0), |(low, medium, high), a| match a.alert_level {
            AlertLevel::Low => (low + 1, medium, high),
            AlertLevel::Medium => (low, medium + 1, high),
            AlertLevel::High => (low, medium, high + 1),
        })
    }
}

/// Score every district present in the observations.
///
/// Features are aggregated sparsely: a district's history is only the days
/// it was observed. The latest of those days is classified and scored; the
/// hospital case series over all of them is forecast.
pub fn assess(
    observations: &Observations,
    classifier: &dyn AnomalyClassifier,
    forecaster: &dyn Forecaster,
    parallel: bool,
) -> Result<Assessment> {
    let table = aggregate_observations(observations, AggregationMode::Sparse);
    let histories: Vec<Vec<&DistrictDayFeatureVector>> = table.district_histories().into_values().collect();

    let scored = assess_histories(&histories, classifier, forecaster, parallel)?;

    Ok(Assessment {
        assessments: scored.into_iter().flatten().collect(),
        report: *table.report(),
    })
}

fn assess_histories(
    histories: &[Vec<&DistrictDayFeatureVector>],
    classifier: &dyn AnomalyClassifier,
    forecaster: &dyn Forecaster,
    parallel: bool,
) -> Result<Vec<Option<RiskAssessment>>> {
    #[cfg(feature = "parallel")]
    if parallel {
        use rayon::prelude::*;

        return histories
            .par_iter()
            .map(|history| assess_district(history, classifier, forecaster))
            .collect();
    }

    #[cfg(not(feature = "parallel"))]
    if parallel {
        tracing::debug!("parallel scoring requested without the parallel feature, scoring sequentially");
    }

    histories
        .iter()
        .map(|history| assess_district(history, classifier, forecaster))
        .collect()
}

fn assess_district(
    history: &[&DistrictDayFeatureVector],
    classifier: &dyn AnomalyClassifier,
    forecaster: &dyn Forecaster,
) -> Result<Option<RiskAssessment>> {
    let latest = match history.last() {
        Some(latest) => *latest,
        None => return Ok(None),
    };

    let anomalous = classifier.classify(latest);
    let series: Vec<(NaiveDate, f64)> = history
        .iter()
        .map(|v| (v.date, v.hospital_case_count as f64))
        .collect();
    let forecast = forecaster.forecast(&series)?;

    let assessment = scoring::score(history, anomalous, forecast);
    if let Some(a) = &assessment {
        tracing::debug!(
            district = %a.district,
            date = %a.date,
            anomalous,
            forecast,
            score = a.outbreak_risk_score,
            level = %a.alert_level,
            "district scored"
        );
    }
    Ok(assessment)
}

/// How a scheduled run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// A new assessment set was published
    Published { set_version: u64 },
    /// No usable model; nothing was published
    ModelUnavailable { reason: String },
    /// The run was abandoned; the previously published set is untouched
    Failed { error: String },
}

/// Summary of one scheduled run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub model_version: Option<u32>,
    pub observations: usize,
    pub assessments: usize,
    pub high_alerts: usize,
    pub aggregation: AggregationReport,
    pub elapsed_ms: u64,
}

impl RunReport {
    fn new(status: RunStatus, started: Instant) -> Self {
        RunReport {
            status,
            model_version: None,
            observations: 0,
            assessments: 0,
            high_alerts: 0,
            aggregation: AggregationReport::default(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self.status, RunStatus::Published { .. })
    }
}

/// Load the latest model, score everything the source holds and publish.
pub fn run_once(
    source: &dyn ObservationSource,
    models: &ModelStore,
    sink: &dyn AssessmentSink,
    config: &EngineConfig,
) -> RunReport {
    let started = Instant::now();

    let (entry, model) = match models.load_latest() {
        Ok(loaded) => loaded,
        Err(e) if e.is_model_missing() => {
            if matches!(e, SurveillanceError::ModelIntegrity { .. }) {
                tracing::error!(error = %e, "stored model failed verification, no assessments produced");
            } else {
                tracing::warn!(error = %e, "no anomaly model available, no assessments produced");
            }
            return RunReport::new(RunStatus::ModelUnavailable { reason: e.to_string() }, started);
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to load anomaly model");
            return RunReport::new(RunStatus::Failed { error: e.to_string() }, started);
        }
    };

    let mut report = RunReport::new(RunStatus::Failed { error: String::new() }, started);
    report.model_version = Some(entry.version);

    let forecaster = TrendForecaster::new(config.forecast);
    let outcome = source
        .load_observations()
        .map_err(SurveillanceError::from)
        .and_then(|observations| {
            report.observations = observations.len();
            assess(&observations, &model, &forecaster, config.parallel)
        })
        .and_then(|assessment| {
            let set_version = sink.publish(&assessment.assessments)?;
            Ok((set_version, assessment))
        });

    match outcome {
        Ok((set_version, assessment)) => {
            report.status = RunStatus::Published { set_version };
            report.assessments = assessment.assessments.len();
            report.high_alerts = assessment.level_counts().2;
            report.aggregation = assessment.report;
            report.elapsed_ms = started.elapsed().as_millis() as u64;
            tracing::info!(
                set_version,
                model_version = entry.version,
                observations = report.observations,
                districts = report.assessments,
                high_alerts = report.high_alerts,
                dropped = report.aggregation.total_dropped(),
                elapsed_ms = report.elapsed_ms,
                "assessment run published"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, retryable = e.is_retryable(), "assessment run failed");
            report.status = RunStatus::Failed { error: e.to_string() };
            report.elapsed_ms = started.elapsed().as_millis() as u64;
        }
    }

    report
}
