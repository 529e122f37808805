//! Error types for the outbreak risk engine
//!
//! Errors are classified by how a scheduled run should react:
//! - Fatal: configuration problems, the process cannot start
//! - Degraded: no usable model, the run produces no assessments
//! - Run failure: storage, forecasting or serialization problems; the run is
//!   abandoned and the scheduler retries on its next interval

use thiserror::Error;

/// Top-level engine error
#[derive(Debug, Error)]
pub enum SurveillanceError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Anomaly model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model artifact v{version} failed checksum verification")]
    ModelIntegrity { version: u32 },

    #[error("Training error: {0}")]
    Training(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Forecast error: {0}")]
    Forecast(#[from] ForecastError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SurveillanceError {
    /// Returns true if the process cannot continue
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SurveillanceError::Configuration(_)
                | SurveillanceError::Storage(StorageError::UnsupportedConnection(_))
        )
    }

    /// Returns true if the next scheduled run may succeed without intervention
    pub fn is_retryable(&self) -> bool {
        match self {
            SurveillanceError::Storage(StorageError::UnsupportedConnection(_)) => false,
            SurveillanceError::Storage(_) | SurveillanceError::Io(_) => true,
            _ => false,
        }
    }

    /// Returns true if the run should degrade to "no assessment produced"
    pub fn is_model_missing(&self) -> bool {
        matches!(
            self,
            SurveillanceError::ModelUnavailable(_) | SurveillanceError::ModelIntegrity { .. }
        )
    }
}

/// Errors raised by storage adapters
#[derive(Debug, Error)]
pub enum StorageError {
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Unsupported connection string: {0}")]
    UnsupportedConnection(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid value {value:?} in {table}.{column}")]
    InvalidColumn {
        table: &'static str,
        column: &'static str,
        value: String,
    },
}

/// Errors raised by the trend forecaster
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    #[error("History is not in chronological order at index {index}")]
    Unsorted { index: usize },

    #[error("History contains duplicate date {date}")]
    DuplicateDate { date: chrono::NaiveDate },

    #[error("Forecast horizon must be at least one day")]
    InvalidHorizon,
}

pub type Result<T, E = SurveillanceError> = std::result::Result<T, E>;
