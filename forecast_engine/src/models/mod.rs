//! Forecasting strategies and the result contract they share

use crate::budget::FitBudget;
use crate::data::TimeSeries;
use crate::error::{ForecastError, Result};
use crate::metrics::ForecastAccuracy;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

/// The four interchangeable forecasting strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Arima,
    Prophet,
    Lstm,
    LaggedGbm,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::Arima => "ARIMA",
            StrategyKind::Prophet => "Prophet",
            StrategyKind::Lstm => "LSTM",
            StrategyKind::LaggedGbm => "LaggedGBM",
        };
        f.write_str(name)
    }
}

/// Lower and upper forecast bounds at a nominal coverage level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// Nominal coverage in (0, 1)
    pub level: f64,
}

/// Quality signals a strategy collected while fitting
///
/// Each strategy fills in the fields that make sense for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    /// Innovation variance (ARIMA)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sigma2: Option<f64>,
    /// Akaike information criterion (ARIMA)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aic: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ar_coefficients: Vec<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ma_coefficients: Vec<f64>,
    /// Per-epoch training loss (LSTM)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub train_loss: Vec<f64>,
    /// Per-epoch validation loss (LSTM)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validation_loss: Vec<f64>,
    /// Accuracy on the chronological holdout (LaggedGBM)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holdout: Option<ForecastAccuracy>,
    /// Accuracy of the fitted values over the history (Prophet)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_sample: Option<ForecastAccuracy>,
}

/// Forecast produced by a strategy
///
/// `index`, `values` and, when present, both bounds always have the same
/// length: the requested horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ForecastResultRecord")]
pub struct ForecastResult {
    strategy: StrategyKind,
    index: Vec<NaiveDateTime>,
    values: Vec<f64>,
    bounds: Option<ConfidenceBounds>,
    diagnostics: FitDiagnostics,
}

/// Unchecked wire form of a [`ForecastResult`]
#[derive(Deserialize)]
struct ForecastResultRecord {
    strategy: StrategyKind,
    index: Vec<NaiveDateTime>,
    values: Vec<f64>,
    #[serde(default)]
    bounds: Option<ConfidenceBounds>,
    #[serde(default)]
    diagnostics: FitDiagnostics,
}

impl TryFrom<ForecastResultRecord> for ForecastResult {
    type Error = ForecastError;

    fn try_from(record: ForecastResultRecord) -> Result<Self> {
        let result = Self::new(record.strategy, record.index, record.values)?;
        let result = match record.bounds {
            Some(bounds) => result.with_bounds(bounds)?,
            None => result,
        };
        Ok(result.with_diagnostics(record.diagnostics))
    }
}

impl ForecastResult {
    /// Create a new forecast result
    pub fn new(strategy: StrategyKind, index: Vec<NaiveDateTime>, values: Vec<f64>) -> Result<Self> {
        if values.len() != index.len() {
            return Err(ForecastError::Forecasting(format!(
                "Values length ({}) doesn't match index length ({})",
                values.len(),
                index.len()
            )));
        }
        if let Some(step) = values.iter().position(|v| !v.is_finite()) {
            return Err(ForecastError::Forecasting(format!(
                "{strategy} produced a non-finite forecast at step {}",
                step + 1
            )));
        }

        Ok(Self {
            strategy,
            index,
            values,
            bounds: None,
            diagnostics: FitDiagnostics::default(),
        })
    }

    /// Attach confidence bounds
    pub fn with_bounds(mut self, bounds: ConfidenceBounds) -> Result<Self> {
        if bounds.lower.len() != self.values.len() || bounds.upper.len() != self.values.len() {
            return Err(ForecastError::Forecasting(format!(
                "Bounds length ({}, {}) doesn't match horizon ({})",
                bounds.lower.len(),
                bounds.upper.len(),
                self.values.len()
            )));
        }
        if !(bounds.level > 0.0 && bounds.level < 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "Confidence level must be between 0 and 1, got {}",
                bounds.level
            )));
        }
        if bounds
            .lower
            .iter()
            .chain(&bounds.upper)
            .any(|v| !v.is_finite())
        {
            return Err(ForecastError::Forecasting(format!(
                "{} produced non-finite confidence bounds",
                self.strategy
            )));
        }

        self.bounds = Some(bounds);
        Ok(self)
    }

    pub fn with_diagnostics(mut self, diagnostics: FitDiagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// Timestamps of the forecast steps
    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn bounds(&self) -> Option<&ConfidenceBounds> {
        self.bounds.as_ref()
    }

    pub fn diagnostics(&self) -> &FitDiagnostics {
        &self.diagnostics
    }

    /// Number of periods forecasted
    pub fn horizon(&self) -> usize {
        self.values.len()
    }
}

/// A model that fits a series and extrapolates it
pub trait ForecastStrategy: Debug + Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Fit on `series` and forecast `horizon` periods, giving up once `budget` is spent
    fn fit_and_forecast_within(
        &self,
        series: &TimeSeries,
        horizon: usize,
        budget: &FitBudget,
    ) -> Result<ForecastResult>;

    /// Fit on `series` and forecast `horizon` periods
    fn fit_and_forecast(&self, series: &TimeSeries, horizon: usize) -> Result<ForecastResult> {
        self.fit_and_forecast_within(series, horizon, &FitBudget::unbounded())
    }
}

/// Reject a zero horizon before any fitting work starts
pub fn validate_horizon(horizon: usize) -> Result<()> {
    if horizon == 0 {
        return Err(ForecastError::Forecasting(
            "Forecast horizon must be a positive number of periods".to_string(),
        ));
    }
    Ok(())
}

pub mod arima;
pub mod boosting;
pub mod lagged_gbm;
pub mod lstm;
pub mod prophet;
pub mod rollout;

pub use arima::{ArimaParams, ArimaStrategy};
pub use boosting::{BoosterParams, GradientBooster};
pub use lagged_gbm::{LagRollout, LagTable, LaggedGbmParams, LaggedGbmStrategy};
pub use lstm::{LstmParams, LstmStrategy};
pub use prophet::{Holiday, ProphetParams, ProphetStrategy, Toggle};
pub use rollout::{recursive_rollout, OneStepPredictor};
