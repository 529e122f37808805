//! Engine configuration
//!
//! # Example
//!
//! ```ignore
//! use outbreak_core::config::EngineConfig;
//! use outbreak_core::model_store::RetrainPolicy;
//!
//! let config = EngineConfig::new("sqlite://surveillance.db")
//!     .with_model_dir("/var/lib/outbreak/models")
//!     .with_retrain_policy(RetrainPolicy::MaxAge { days: 30 })
//!     .with_parallel(true);
//! ```

use crate::anomaly::ForestParams;
use crate::error::{Result, SurveillanceError};
use crate::forecast::ForecastConfig;
use crate::model_store::RetrainPolicy;
use std::path::PathBuf;

/// Required: connection string for the observation and assessment store
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
/// Optional: model store directory
pub const MODEL_DIR_VAR: &str = "OUTBREAK_MODEL_DIR";
/// Optional: retrain once the latest model is older than this many days
pub const RETRAIN_MAX_AGE_VAR: &str = "OUTBREAK_RETRAIN_MAX_AGE_DAYS";

const DEFAULT_MODEL_DIR: &str = "models";

/// Everything a run needs besides its inputs
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub database_url: String,
    pub model_dir: PathBuf,
    pub forecast: ForecastConfig,
    pub forest: ForestParams,
    pub retrain_policy: RetrainPolicy,
    /// Score districts on the rayon pool (needs the `parallel` feature)
    pub parallel: bool,
}

impl EngineConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        EngineConfig {
            database_url: database_url.into(),
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            forecast: ForecastConfig::default(),
            forest: ForestParams::default(),
            retrain_policy: RetrainPolicy::default(),
            parallel: false,
        }
    }

    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup(DATABASE_URL_VAR)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SurveillanceError::Configuration(format!("{} is not set", DATABASE_URL_VAR)))?;

        let mut config = EngineConfig::new(database_url);

        if let Some(dir) = lookup(MODEL_DIR_VAR).filter(|v| !v.trim().is_empty()) {
            config.model_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup(RETRAIN_MAX_AGE_VAR) {
            let days: u32 = raw.trim().parse().map_err(|_| {
                SurveillanceError::Configuration(format!(
                    "{} must be a whole number of days, got {:?}",
                    RETRAIN_MAX_AGE_VAR, raw
                ))
            })?;
            config.retrain_policy = RetrainPolicy::MaxAge { days };
        }

        Ok(config)
    }

    /// Set model store directory
    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = dir.into();
        self
    }

    /// Set forecaster configuration
    pub fn with_forecast(mut self, forecast: ForecastConfig) -> Self {
        self.forecast = forecast;
        self
    }

    /// Set isolation forest parameters used for training
    pub fn with_forest(mut self, forest: ForestParams) -> Self {
        self.forest = forest;
        self
    }

    /// Set retrain policy
    pub fn with_retrain_policy(mut self, policy: RetrainPolicy) -> Self {
        self.retrain_policy = policy;
        self
    }

    /// Enable/disable parallel district scoring
    pub fn with_parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }
}
