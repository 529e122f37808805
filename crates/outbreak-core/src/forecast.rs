//! Short-horizon trend forecasting
//!
//! Predicts a district's hospital case count a few days past its last
//! observation. The model is refit from scratch on every call: histories are
//! short (about a month) and nothing is persisted between runs.
//!
//! The fitted model is additive:
//!
//! ```text
//! ŷ(t) = intercept + slope·t + seasonal[t mod period]
//! ```
//!
//! where `t` is the day offset from the first observation. The trend is an
//! ordinary least-squares line. The seasonal term is the mean detrended
//! residual per phase, centred to sum to zero, and is only estimated once the
//! history spans two full periods. The default period is one day (daily
//! seasonality), which is constant on date-level points and so reduces to
//! the pure trend.

use crate::error::ForecastError;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

const BACKFIT_ROUNDS: usize = 10;

/// Anything that can project a dated series forward
pub trait Forecaster: Send + Sync {
    /// Predict the value `horizon_days` after the last history point
    fn forecast(&self, history: &[(NaiveDate, f64)]) -> Result<f64, ForecastError>;
}

/// Forecaster configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Days past the last observation to predict
    pub horizon_days: u32,
    /// Seasonal period in days (1 = daily)
    pub seasonality_period_days: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        ForecastConfig {
            horizon_days: 2,
            seasonality_period_days: 1,
        }
    }
}

impl ForecastConfig {
    pub fn with_horizon_days(mut self, days: u32) -> Self {
        self.horizon_days = days;
        self
    }

    pub fn with_seasonality_period_days(mut self, days: u32) -> Self {
        self.seasonality_period_days = days.max(1);
        self
    }
}

/// A fitted trend-plus-seasonality model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedTrend {
    pub origin: NaiveDate,
    pub intercept: f64,
    pub slope: f64,
    /// Per-phase seasonal offsets; empty when seasonality was not estimated
    pub seasonal: Vec<f64>,
}

impl FittedTrend {
    /// Model value on a given date
    pub fn predict(&self, date: NaiveDate) -> f64 {
        let t = (date - self.origin).num_days();
        let mut value = self.intercept + self.slope * t as f64;
        if !self.seasonal.is_empty() {
            let phase = t.rem_euclid(self.seasonal.len() as i64) as usize;
            value += self.seasonal[phase];
        }
        value
    }
}

/// Default forecaster: least-squares trend with optional seasonality
#[derive(Debug, Clone, Copy, Default)]
pub struct TrendForecaster {
    config: ForecastConfig,
}

impl TrendForecaster {
    pub fn new(config: ForecastConfig) -> Self {
        TrendForecaster { config }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Fit the model. Needs at least two distinct, ordered dates.
    pub fn fit(&self, history: &[(NaiveDate, f64)]) -> Result<Option<FittedTrend>, ForecastError> {
        validate_history(history)?;
        if history.len() < 2 {
            return Ok(None);
        }

        let origin = history[0].0;
        let ts: Vec<f64> = history.iter().map(|(d, _)| (*d - origin).num_days() as f64).collect();
        let ys: Vec<f64> = history.iter().map(|(_, y)| *y).collect();

        let period = self.config.seasonality_period_days.max(1) as usize;
        let span = ts[ts.len() - 1] as usize + 1;

        if period == 1 || span < 2 * period {
            let (intercept, slope) = least_squares(&ts, &ys);
            return Ok(Some(FittedTrend {
                origin,
                intercept,
                slope,
                seasonal: Vec::new(),
            }));
        }

        // Backfit trend and seasonal terms so neither absorbs the other
        let mut seasonal = vec![0.0; period];
        let (mut intercept, mut slope) = (0.0, 0.0);
        for _ in 0..BACKFIT_ROUNDS {
            let deseasonalised: Vec<f64> = ts
                .iter()
                .zip(&ys)
                .map(|(t, y)| y - seasonal[(*t as usize) % period])
                .collect();
            (intercept, slope) = least_squares(&ts, &deseasonalised);
            seasonal = seasonal_offsets(&ts, &ys, intercept, slope, period);
        }

        Ok(Some(FittedTrend {
            origin,
            intercept,
            slope,
            seasonal,
        }))
    }
}

impl Forecaster for TrendForecaster {
    fn forecast(&self, history: &[(NaiveDate, f64)]) -> Result<f64, ForecastError> {
        if self.config.horizon_days == 0 {
            return Err(ForecastError::InvalidHorizon);
        }

        match self.fit(history)? {
            Some(model) => {
                let (last_date, _) = history[history.len() - 1];
                let target = last_date + Duration::days(i64::from(self.config.horizon_days));
                Ok(model.predict(target))
            }
            None => {
                // Not enough points to fit a trend; carry the last value forward
                let fallback = history.last().map(|(_, y)| *y).unwrap_or(0.0);
                tracing::debug!(points = history.len(), fallback, "history too short to forecast");
                Ok(fallback)
            }
        }
    }
}

fn validate_history(history: &[(NaiveDate, f64)]) -> Result<(), ForecastError> {
    for (index, pair) in history.windows(2).enumerate() {
        let (prev, next) = (pair[0].0, pair[1].0);
        if next == prev {
            return Err(ForecastError::DuplicateDate { date: next });
        }
        if next < prev {
            return Err(ForecastError::Unsorted { index: index + 1 });
        }
    }
    Ok(())
}

/// Ordinary least-squares line through (t, y); needs at least two distinct t
fn least_squares(ts: &[f64], ys: &[f64]) -> (f64, f64) {
    let n = ts.len() as f64;
    let t_mean = ts.iter().sum::<f64>() / n;
    let y_mean = ys.iter().sum::<f64>() / n;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (t, y) in ts.iter().zip(ys) {
        sxy += (t - t_mean) * (y - y_mean);
        sxx += (t - t_mean).powi(2);
    }

    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    (y_mean - slope * t_mean, slope)
}

fn seasonal_offsets(ts: &[f64], ys: &[f64], intercept: f64, slope: f64, period: usize) -> Vec<f64> {
    let mut sums = vec![0.0; period];
    let mut counts = vec![0usize; period];

    for (t, y) in ts.iter().zip(ys) {
        let phase = (*t as usize) % period;
        sums[phase] += y - (intercept + slope * t);
        counts[phase] += 1;
    }

    let mut offsets: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
        .collect();

    let observed: Vec<f64> = offsets
        .iter()
        .zip(&counts)
        .filter(|(_, &c)| c > 0)
        .map(|(o, _)| *o)
        .collect();
    let centre = observed.iter().sum::<f64>() / observed.len().max(1) as f64;
    for (offset, &count) in offsets.iter_mut().zip(&counts) {
        if count > 0 {
            *offset -= centre;
        }
    }

    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap() + Duration::days(i64::from(d))
    }

    fn series(values: &[f64]) -> Vec<(NaiveDate, f64)> {
        values.iter().enumerate().map(|(i, v)| (day(i as u32), *v)).collect()
    }

    #[test]
    fn test_linear_trend_extrapolates() {
        let forecaster = TrendForecaster::default();
        // y = 3 + 2t, last t = 4, horizon 2 -> t = 6
        let history = series(&[3.0, 5.0, 7.0, 9.0, 11.0]);
        let predicted = forecaster.forecast(&history).unwrap();
        assert!((predicted - 15.0).abs() < 1e-9, "got {}", predicted);
    }

    #[test]
    fn test_flat_series_stays_flat() {
        let forecaster = TrendForecaster::default();
        let predicted = forecaster.forecast(&series(&[20.0; 14])).unwrap();
        assert!((predicted - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_gaps_use_calendar_offsets() {
        let forecaster = TrendForecaster::new(ForecastConfig::default().with_horizon_days(1));
        // Points at t = 0 and t = 10 on y = t
        let history = vec![(day(0), 0.0), (day(10), 10.0)];
        assert!((forecaster.forecast(&history).unwrap() - 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_history_degrades_to_last_value() {
        let forecaster = TrendForecaster::default();
        assert_eq!(forecaster.forecast(&[]).unwrap(), 0.0);
        assert_eq!(forecaster.forecast(&[(day(0), 17.0)]).unwrap(), 17.0);
    }

    #[test]
    fn test_rejects_unsorted_and_duplicate_dates() {
        let forecaster = TrendForecaster::default();
        let unsorted = vec![(day(2), 1.0), (day(1), 2.0)];
        assert_eq!(forecaster.forecast(&unsorted), Err(ForecastError::Unsorted { index: 1 }));

        let duplicate = vec![(day(1), 1.0), (day(1), 2.0)];
        assert_eq!(
            forecaster.forecast(&duplicate),
            Err(ForecastError::DuplicateDate { date: day(1) })
        );
    }

    #[test]
    fn test_zero_horizon_rejected() {
        let forecaster = TrendForecaster::new(ForecastConfig::default().with_horizon_days(0));
        assert_eq!(forecaster.forecast(&series(&[1.0, 2.0])), Err(ForecastError::InvalidHorizon));
    }

    #[test]
    fn test_weekly_seasonality_recovers_pattern() {
        let pattern = [10.0, 12.0, 14.0, 12.0, 10.0, 6.0, 6.0];
        let values: Vec<f64> = (0..21).map(|i| pattern[i % 7]).collect();
        let forecaster = TrendForecaster::new(
            ForecastConfig::default()
                .with_horizon_days(2)
                .with_seasonality_period_days(7),
        );

        // Last t = 20 (phase 6); t = 22 is phase 1
        let predicted = forecaster.forecast(&series(&values)).unwrap();
        assert!((predicted - 12.0).abs() < 0.5, "got {}", predicted);
    }

    #[test]
    fn test_daily_seasonality_is_pure_trend() {
        let values = [4.0, 9.0, 5.0, 11.0, 6.0, 12.0];
        let forecaster = TrendForecaster::default();
        let model = forecaster.fit(&series(&values)).unwrap().unwrap();
        assert!(model.seasonal.is_empty());
    }
}
