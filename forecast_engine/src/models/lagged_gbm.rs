//! Gradient boosting on lagged copies of the series
//!
//! The series is turned into a supervised table where the value at `t` is
//! the target and the values at `t-1 .. t-n_lags` are the features. The
//! booster is trained on a chronological split and scored on the holdout.

use crate::budget::FitBudget;
use crate::data::TimeSeries;
use crate::error::{ForecastError, Result};
use crate::metrics::forecast_accuracy;
use crate::models::boosting::{BoosterParams, GradientBooster};
use crate::models::rollout::{recursive_rollout, OneStepPredictor};
use crate::models::{validate_horizon, FitDiagnostics, ForecastResult, ForecastStrategy, StrategyKind};
use crate::utils::train_test_split;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// How forecasts beyond the data are produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LagRollout {
    /// Refit on every row, then feed each prediction back in as a lag
    #[default]
    Recursive,
    /// Report the first `horizon` holdout predictions as the forecast
    ///
    /// These values describe the end of the known history, not the future.
    HoldoutReplay,
}

/// Lagged-feature boosting options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaggedGbmParams {
    /// Number of lag features
    pub n_lags: usize,
    /// Trailing share of rows held out for scoring
    pub test_ratio: f64,
    pub booster: BoosterParams,
    pub rollout: LagRollout,
}

impl Default for LaggedGbmParams {
    fn default() -> Self {
        Self {
            n_lags: 12,
            test_ratio: 0.2,
            booster: BoosterParams::default(),
            rollout: LagRollout::default(),
        }
    }
}

impl LaggedGbmParams {
    pub fn new(n_lags: usize) -> Self {
        Self {
            n_lags,
            ..Self::default()
        }
    }

    pub fn with_rollout(mut self, rollout: LagRollout) -> Self {
        self.rollout = rollout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.test_ratio) {
            return Err(ForecastError::InvalidParameter(format!(
                "test_ratio must be in [0, 1), got {}",
                self.test_ratio
            )));
        }
        self.booster.validate()
    }
}

/// Supervised view of a series: one row per value with a full lag history
#[derive(Debug, Clone, PartialEq)]
pub struct LagTable {
    n_lags: usize,
    features: Vec<Vec<f64>>,
    targets: Vec<f64>,
}

impl LagTable {
    /// Build the table for `values`
    ///
    /// Row `r` targets `values[r + n_lags]`; its features are the preceding
    /// values, most recent first. The first `n_lags` values have an
    /// incomplete history and produce no row.
    pub fn build(values: &[f64], n_lags: usize) -> Result<Self> {
        if n_lags == 0 {
            return Err(ForecastError::InvalidParameter(
                "n_lags must be positive".to_string(),
            ));
        }

        let (features, targets) = (n_lags..values.len())
            .map(|t| {
                let lags: Vec<f64> = (1..=n_lags).map(|lag| values[t - lag]).collect();
                (lags, values[t])
            })
            .unzip();

        Ok(Self {
            n_lags,
            features,
            targets,
        })
    }

    pub fn n_lags(&self) -> usize {
        self.n_lags
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn features(&self) -> &[Vec<f64>] {
        &self.features
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }
}

/// Adapts a booster trained on lag rows to window-based rollout
struct LagPredictor<'a> {
    booster: &'a GradientBooster,
    n_lags: usize,
}

impl OneStepPredictor for LagPredictor<'_> {
    fn window_len(&self) -> usize {
        self.n_lags
    }

    fn predict_next(&self, window: &[f64]) -> Result<f64> {
        let lags: Vec<f64> = window.iter().rev().copied().collect();
        Ok(self.booster.predict_row(&lags))
    }
}

/// Lagged-feature gradient boosting strategy
#[derive(Debug, Clone, Default)]
pub struct LaggedGbmStrategy {
    params: LaggedGbmParams,
}

impl LaggedGbmStrategy {
    pub fn new(params: LaggedGbmParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &LaggedGbmParams {
        &self.params
    }

    fn fail(&self, reason: impl Into<String>) -> ForecastError {
        ForecastError::model_fit(StrategyKind::LaggedGbm, reason)
    }

    fn forecast_values(
        &self,
        values: &[f64],
        horizon: usize,
        budget: &FitBudget,
    ) -> Result<(Vec<f64>, FitDiagnostics)> {
        self.params.validate()?;
        let n_lags = self.params.n_lags;
        if n_lags == 0 {
            return Err(self.fail("n_lags must be positive"));
        }
        if values.len() < n_lags + 2 {
            return Err(self.fail(format!(
                "{n_lags} lags need at least {} observations, got {}",
                n_lags + 2,
                values.len()
            )));
        }

        let table = LagTable::build(values, n_lags)?;
        let (train_x, test_x) = train_test_split(table.features(), self.params.test_ratio);
        let (train_y, test_y) = train_test_split(table.targets(), self.params.test_ratio);
        if train_y.is_empty() {
            return Err(self.fail(format!(
                "test_ratio {} leaves no training rows out of {}",
                self.params.test_ratio,
                table.len()
            )));
        }
        debug!(
            rows = table.len(),
            train = train_y.len(),
            holdout = test_y.len(),
            "Built lag table"
        );

        let booster = GradientBooster::fit(train_x, train_y, &self.params.booster, budget)?;
        let holdout_predictions = booster.predict(test_x);
        let holdout = if test_y.is_empty() {
            None
        } else {
            Some(forecast_accuracy(&holdout_predictions, test_y)?)
        };
        let diagnostics = FitDiagnostics {
            holdout,
            ..FitDiagnostics::default()
        };

        let forecast = match self.params.rollout {
            LagRollout::Recursive => {
                let full = if test_y.is_empty() {
                    booster
                } else {
                    GradientBooster::fit(table.features(), table.targets(), &self.params.booster, budget)?
                };
                let predictor = LagPredictor {
                    booster: &full,
                    n_lags,
                };
                recursive_rollout(&predictor, values, horizon)?
            }
            LagRollout::HoldoutReplay => {
                warn!("Holdout replay reports in-sample predictions as the forecast");
                if holdout_predictions.len() < horizon {
                    return Err(ForecastError::Forecasting(format!(
                        "Holdout has {} rows, fewer than the horizon {horizon}",
                        holdout_predictions.len()
                    )));
                }
                holdout_predictions[..horizon].to_vec()
            }
        };

        Ok((forecast, diagnostics))
    }
}

impl ForecastStrategy for LaggedGbmStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LaggedGbm
    }

    fn fit_and_forecast_within(
        &self,
        series: &TimeSeries,
        horizon: usize,
        budget: &FitBudget,
    ) -> Result<ForecastResult> {
        validate_horizon(horizon)?;
        let index = series.future_index(horizon)?;
        let (forecast, diagnostics) = self.forecast_values(series.values(), horizon, budget)?;

        info!(
            n_lags = self.params.n_lags,
            rollout = ?self.params.rollout,
            horizon,
            holdout_mae = diagnostics.holdout.map(|a| a.mae),
            "LaggedGBM forecast complete"
        );

        Ok(ForecastResult::new(StrategyKind::LaggedGbm, index, forecast)?.with_diagnostics(diagnostics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use pretty_assertions::assert_eq;

    fn daily_series(values: Vec<f64>) -> TimeSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let timestamps = (0..values.len() as i64)
            .map(|i| start + Duration::days(i))
            .collect();
        TimeSeries::new(timestamps, values).unwrap()
    }

    fn small_params(n_lags: usize) -> LaggedGbmParams {
        LaggedGbmParams {
            n_lags,
            booster: BoosterParams {
                n_estimators: 30,
                max_depth: 3,
                ..BoosterParams::default()
            },
            ..LaggedGbmParams::default()
        }
    }

    #[test]
    fn test_lag_table_layout() {
        let table = LagTable::build(&[1.0, 2.0, 3.0, 4.0, 5.0], 2).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.targets(), &[3.0, 4.0, 5.0]);
        assert_eq!(
            table.features(),
            &[vec![2.0, 1.0], vec![3.0, 2.0], vec![4.0, 3.0]]
        );
    }

    #[test]
    fn test_lag_table_rejects_zero_lags() {
        assert!(LagTable::build(&[1.0, 2.0], 0).is_err());
    }

    #[test]
    fn test_too_few_observations() {
        let series = daily_series(vec![1.0, 2.0, 3.0]);
        let err = LaggedGbmStrategy::new(small_params(2))
            .fit_and_forecast(&series, 2)
            .unwrap_err();
        assert!(matches!(
            err,
            ForecastError::ModelFit {
                strategy: StrategyKind::LaggedGbm,
                ..
            }
        ));
    }

    #[test]
    fn test_recursive_forecast_has_horizon_length() {
        let values: Vec<f64> = (0..60).map(|i| 10.0 + (i % 7) as f64).collect();
        let series = daily_series(values);
        let result = LaggedGbmStrategy::new(small_params(7))
            .fit_and_forecast(&series, 14)
            .unwrap();
        assert_eq!(result.horizon(), 14);
        assert_eq!(result.index().len(), 14);
        assert!(result.index()[0] > series.last_timestamp().unwrap());
        assert!(result.diagnostics().holdout.is_some());
        // a weekly pattern is fully described by seven lags
        assert!((result.values()[0] - 14.0).abs() < 0.5);
    }

    #[test]
    fn test_holdout_replay_truncates_predictions() {
        let values: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let series = daily_series(values);
        let strategy =
            LaggedGbmStrategy::new(small_params(3).with_rollout(LagRollout::HoldoutReplay));

        let result = strategy.fit_and_forecast(&series, 4).unwrap();
        assert_eq!(result.horizon(), 4);

        // 37 rows, 8 held out
        let err = strategy.fit_and_forecast(&series, 9).unwrap_err();
        assert!(matches!(err, ForecastError::Forecasting(_)));
    }

    #[test]
    fn test_without_holdout_has_no_accuracy() {
        let values: Vec<f64> = (0..20).map(|i| (i as f64).sqrt()).collect();
        let params = LaggedGbmParams {
            test_ratio: 0.0,
            ..small_params(2)
        };
        let result = LaggedGbmStrategy::new(params)
            .fit_and_forecast(&daily_series(values), 3)
            .unwrap();
        assert_eq!(result.diagnostics().holdout, None);
    }
}
