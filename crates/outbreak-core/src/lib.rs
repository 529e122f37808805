//! Outbreak Core - District Outbreak Risk Engine
//!
//! Turns raw public-health surveillance records into one outbreak risk
//! assessment per district.
//!
//! # Pipeline
//!
//! - Hospital visits, pharmacy sales and social posts are aggregated into
//!   five-count district-day feature vectors
//! - A global isolation forest flags anomalous district-days
//! - A per-district trend model forecasts near-term hospital cases
//! - A fixed additive heuristic combines the signals into a score in [0, 1],
//!   an alert level and a human-readable explanation
//!
//! # Example
//!
//! ```rust
//! use outbreak_core::{assess, FixedClassifier, Observations, TrendForecaster};
//!
//! let observations = Observations::default();
//! let result = assess(&observations, &FixedClassifier(false), &TrendForecaster::default(), false).unwrap();
//! assert!(result.assessments.is_empty());
//! ```

pub mod anomaly;
pub mod config;
pub mod error;
pub mod features;
pub mod forecast;
pub mod model_store;
pub mod pipeline;
pub mod records;
pub mod scoring;
pub mod storage;
pub mod trainer;

// Re-export commonly used types for convenience
pub use anomaly::{AnomalyClassifier, AnomalyModel, FixedClassifier, ForestParams};
pub use config::EngineConfig;
pub use error::{ForecastError, Result, StorageError, SurveillanceError};
pub use features::{aggregate, aggregate_observations, AggregationMode, AggregationReport, DistrictDayFeatureVector, FeatureTable};
pub use forecast::{ForecastConfig, Forecaster, TrendForecaster};
pub use model_store::{ModelEntry, ModelStore, RetrainPolicy};
pub use pipeline::{assess, run_once, Assessment, RunReport, RunStatus};
pub use records::{HospitalVisit, Observations, PharmacySale, Sentiment, Severity, SocialPost};
pub use scoring::{AlertLevel, RiskAssessment};
pub use storage::{AssessmentSink, MemoryStore, ObservationSource};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStore;
pub use trainer::{ModelTrainer, TrainOutcome};
