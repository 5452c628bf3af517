//! Prophet-style additive decomposition
//!
//! `y(t) = trend(t) + seasonality(t) + holidays(t) + noise`, fitted as one
//! penalised regression on absmax-scaled values. The trend is piecewise
//! linear with hinge terms at changepoints spread over the early part of
//! the history, seasonalities are truncated Fourier series and holidays are
//! indicator columns, one per day offset inside each holiday's window.
//! Priors become ridge penalties: a Laplace prior of scale `b` is matched
//! by a normal prior with the same variance `2 b^2`.

use crate::budget::FitBudget;
use crate::data::TimeSeries;
use crate::error::{ForecastError, Result};
use crate::frequency::Frequency;
use crate::metrics::forecast_accuracy;
use crate::models::{
    validate_horizon, ConfidenceBounds, FitDiagnostics, ForecastResult, ForecastStrategy,
    StrategyKind,
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use series_math::penalized_least_squares;
use series_math::stats::variance;
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::HashSet;
use std::f64::consts::PI;
use tracing::{debug, info, warn};

const SECONDS_PER_DAY: f64 = 86_400.0;
const DAYS_PER_YEAR: f64 = 365.25;

/// Prior variance of the base growth rate and offset
const TREND_PRIOR_VARIANCE: f64 = 25.0;

/// Floor for the noise variance used to turn priors into penalties
const MIN_NOISE_VARIANCE: f64 = 1e-8;

/// Widest holiday window on either side of a date
const MAX_HOLIDAY_WINDOW_DAYS: i64 = 366;

/// Whether a seasonal component is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Toggle {
    /// On when the data is fine-grained enough and covers two full periods
    Auto,
    On,
    Off,
}

/// A named event with the days around it that it affects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holiday {
    pub name: String,
    pub dates: Vec<NaiveDate>,
    /// Days before each date that are also affected, zero or negative
    #[serde(default)]
    pub lower_window: i64,
    /// Days after each date that are also affected, zero or positive
    #[serde(default)]
    pub upper_window: i64,
}

impl Holiday {
    pub fn new(name: impl Into<String>, dates: Vec<NaiveDate>) -> Self {
        Self {
            name: name.into(),
            dates,
            lower_window: 0,
            upper_window: 0,
        }
    }

    pub fn with_window(mut self, lower: i64, upper: i64) -> Self {
        self.lower_window = lower;
        self.upper_window = upper;
        self
    }
}

/// Prophet model options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProphetParams {
    pub yearly_seasonality: Toggle,
    pub weekly_seasonality: Toggle,
    pub daily_seasonality: Toggle,
    /// Maximum number of potential trend changepoints
    pub n_changepoints: usize,
    /// Share of the history in which changepoints are placed
    pub changepoint_range: f64,
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub holidays: Vec<Holiday>,
    pub holidays_prior_scale: f64,
    /// Coverage of the uncertainty interval
    pub interval_width: f64,
    /// Spacing of the forecast index; the series' own frequency when unset
    pub frequency: Option<Frequency>,
}

impl Default for ProphetParams {
    fn default() -> Self {
        Self {
            yearly_seasonality: Toggle::On,
            weekly_seasonality: Toggle::Auto,
            daily_seasonality: Toggle::Auto,
            n_changepoints: 25,
            changepoint_range: 0.8,
            changepoint_prior_scale: 0.05,
            seasonality_prior_scale: 10.0,
            holidays: Vec::new(),
            holidays_prior_scale: 10.0,
            interval_width: 0.8,
            frequency: None,
        }
    }
}

impl ProphetParams {
    fn validate(&self) -> Result<()> {
        if !(self.changepoint_range > 0.0 && self.changepoint_range <= 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "changepoint_range must be in (0, 1], got {}",
                self.changepoint_range
            )));
        }
        if !(self.interval_width > 0.0 && self.interval_width < 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "interval_width must be in (0, 1), got {}",
                self.interval_width
            )));
        }
        for (name, scale) in [
            ("changepoint_prior_scale", self.changepoint_prior_scale),
            ("seasonality_prior_scale", self.seasonality_prior_scale),
            ("holidays_prior_scale", self.holidays_prior_scale),
        ] {
            if !(scale > 0.0 && scale.is_finite()) {
                return Err(ForecastError::InvalidParameter(format!(
                    "{name} must be positive, got {scale}"
                )));
            }
        }
        for holiday in &self.holidays {
            if holiday.lower_window > 0 || holiday.upper_window < 0 {
                return Err(ForecastError::InvalidParameter(format!(
                    "Holiday '{}' needs lower_window <= 0 <= upper_window",
                    holiday.name
                )));
            }
            if holiday.lower_window < -MAX_HOLIDAY_WINDOW_DAYS
                || holiday.upper_window > MAX_HOLIDAY_WINDOW_DAYS
            {
                return Err(ForecastError::InvalidParameter(format!(
                    "Holiday '{}' window [{}, {}] exceeds {MAX_HOLIDAY_WINDOW_DAYS} days",
                    holiday.name, holiday.lower_window, holiday.upper_window
                )));
            }
        }
        Ok(())
    }
}

/// Fourier block for one periodic component
#[derive(Debug, Clone, PartialEq)]
struct Seasonality {
    name: &'static str,
    period_days: f64,
    order: usize,
}

/// Indicator column for one holiday at one day offset
#[derive(Debug, Clone)]
struct HolidayColumn {
    name: String,
    days: HashSet<NaiveDate>,
}

/// Prophet-style strategy
#[derive(Debug, Clone, Default)]
pub struct ProphetStrategy {
    params: ProphetParams,
}

/// Model fitted to one series
#[derive(Debug, Clone)]
pub struct FittedProphet {
    start: NaiveDateTime,
    span_seconds: f64,
    y_scale: f64,
    /// Changepoint locations in scaled time
    changepoints: Vec<f64>,
    seasonalities: Vec<Seasonality>,
    holidays: Vec<HolidayColumn>,
    coefficients: Vec<f64>,
    /// Residual variance on the scaled axis
    sigma2: f64,
    interval_width: f64,
    fitted: Vec<f64>,
}

impl ProphetStrategy {
    pub fn new(params: ProphetParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ProphetParams {
        &self.params
    }

    fn fail(&self, reason: impl Into<String>) -> ForecastError {
        ForecastError::model_fit(StrategyKind::Prophet, reason)
    }

    /// Seasonal components active for `series`
    fn seasonalities(&self, series: &TimeSeries, frequency: Frequency) -> Vec<Seasonality> {
        let span = series.span_days();
        let step = frequency.approx_days();
        let enabled = |toggle: Toggle, period: f64| match toggle {
            Toggle::On => true,
            Toggle::Off => false,
            Toggle::Auto => step < period && span >= 2.0 * period,
        };

        let mut components = Vec::new();
        if enabled(self.params.yearly_seasonality, DAYS_PER_YEAR) {
            if span < 2.0 * DAYS_PER_YEAR {
                warn!(
                    span_days = span,
                    "yearly seasonality is on but the history covers less than two years"
                );
            }
            components.push(Seasonality {
                name: "yearly",
                period_days: DAYS_PER_YEAR,
                order: 10,
            });
        }
        if enabled(self.params.weekly_seasonality, 7.0) {
            components.push(Seasonality {
                name: "weekly",
                period_days: 7.0,
                order: 3,
            });
        }
        if enabled(self.params.daily_seasonality, 1.0) {
            components.push(Seasonality {
                name: "daily",
                period_days: 1.0,
                order: 4,
            });
        }
        components
    }

    fn holiday_columns(&self) -> Vec<HolidayColumn> {
        let mut columns = Vec::new();
        for holiday in &self.params.holidays {
            for offset in holiday.lower_window..=holiday.upper_window {
                let days = holiday
                    .dates
                    .iter()
                    .filter_map(|d| {
                        Duration::try_days(offset).and_then(|shift| d.checked_add_signed(shift))
                    })
                    .collect();
                columns.push(HolidayColumn {
                    name: format!("{}_{offset:+}", holiday.name),
                    days,
                });
            }
        }
        columns
    }

    /// Fit the decomposition to `series`
    pub fn fit(&self, series: &TimeSeries, budget: &FitBudget) -> Result<FittedProphet> {
        self.params.validate()?;
        let (Some(start), Some(end)) = (series.first_timestamp(), series.last_timestamp()) else {
            return Err(self.fail("empty series"));
        };
        if series.len() < 2 {
            return Err(self.fail("at least two observations are needed to fit a trend"));
        }

        let frequency = self.params.frequency.unwrap_or_else(|| series.frequency());
        let span_seconds = (end - start).num_seconds() as f64;
        let y_scale = series
            .values()
            .iter()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let y_scale = if y_scale > 0.0 { y_scale } else { 1.0 };
        let y: Vec<f64> = series.values().iter().map(|v| v / y_scale).collect();

        let mut model = FittedProphet {
            start,
            span_seconds,
            y_scale,
            changepoints: Vec::new(),
            seasonalities: self.seasonalities(series, frequency),
            holidays: self.holiday_columns(),
            coefficients: Vec::new(),
            sigma2: 0.0,
            interval_width: self.params.interval_width,
            fitted: Vec::new(),
        };
        let t: Vec<f64> = series.timestamps().iter().map(|ts| model.scaled_time(*ts)).collect();
        model.changepoints = self.changepoints(&t);

        let design: Vec<Vec<f64>> = series
            .timestamps()
            .iter()
            .map(|ts| model.design_row(*ts))
            .collect();

        // first pass with the data variance standing in for the noise level
        let initial_noise = variance(&y).unwrap_or(1.0).max(1e-4);
        let first = penalized_least_squares(&design, &y, &self.penalties(&model, initial_noise))
            .map_err(|e| self.fail(format!("initial regression failed: {e}")))?;
        let noise = residual_variance(&design, &y, &first).max(MIN_NOISE_VARIANCE);
        budget.check("Prophet fit")?;

        let coefficients = penalized_least_squares(&design, &y, &self.penalties(&model, noise))
            .map_err(|e| self.fail(format!("regression failed: {e}")))?;
        model.sigma2 = residual_variance(&design, &y, &coefficients);
        model.fitted = design
            .iter()
            .map(|row| dot(row, &coefficients) * y_scale)
            .collect();
        model.coefficients = coefficients;

        debug!(
            changepoints = model.changepoints.len(),
            seasonalities = ?model.seasonalities.iter().map(|s| s.name).collect::<Vec<_>>(),
            holiday_columns = model.holidays.len(),
            sigma2 = model.sigma2,
            "fitted Prophet model"
        );
        Ok(model)
    }

    /// Changepoints at evenly spaced observations within `changepoint_range`
    fn changepoints(&self, t: &[f64]) -> Vec<f64> {
        let history = (self.params.changepoint_range * t.len() as f64).floor() as usize;
        let count = self.params.n_changepoints.min(history.saturating_sub(1));
        if count == 0 {
            return Vec::new();
        }
        let last = (history - 1) as f64;
        let mut points: Vec<f64> = (1..=count)
            .map(|i| t[(i as f64 * last / count as f64).round() as usize])
            .collect();
        points.dedup();
        points
    }

    fn penalties(&self, model: &FittedProphet, noise: f64) -> Vec<f64> {
        let laplace_variance = 2.0 * self.params.changepoint_prior_scale.powi(2);
        let seasonal_variance = self.params.seasonality_prior_scale.powi(2);
        let holiday_variance = self.params.holidays_prior_scale.powi(2);

        let mut penalties = vec![noise / TREND_PRIOR_VARIANCE; 2];
        penalties.extend(std::iter::repeat(noise / laplace_variance).take(model.changepoints.len()));
        let seasonal_columns: usize = model.seasonalities.iter().map(|s| 2 * s.order).sum();
        penalties.extend(std::iter::repeat(noise / seasonal_variance).take(seasonal_columns));
        penalties.extend(std::iter::repeat(noise / holiday_variance).take(model.holidays.len()));
        penalties
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn residual_variance(design: &[Vec<f64>], y: &[f64], coefficients: &[f64]) -> f64 {
    let sum: f64 = design
        .iter()
        .zip(y)
        .map(|(row, target)| (target - dot(row, coefficients)).powi(2))
        .sum();
    sum / y.len().max(1) as f64
}

impl FittedProphet {
    fn scaled_time(&self, ts: NaiveDateTime) -> f64 {
        if self.span_seconds > 0.0 {
            (ts - self.start).num_seconds() as f64 / self.span_seconds
        } else {
            0.0
        }
    }

    /// Regressors: offset, growth, changepoint hinges, Fourier terms, holidays
    fn design_row(&self, ts: NaiveDateTime) -> Vec<f64> {
        let t = self.scaled_time(ts);
        let mut row = vec![1.0, t];
        row.extend(self.changepoints.iter().map(|s| (t - s).max(0.0)));

        let days = ts.and_utc().timestamp() as f64 / SECONDS_PER_DAY;
        for component in &self.seasonalities {
            for k in 1..=component.order {
                let angle = 2.0 * PI * k as f64 * days / component.period_days;
                row.push(angle.sin());
                row.push(angle.cos());
            }
        }

        let date = ts.date();
        row.extend(
            self.holidays
                .iter()
                .map(|h| if h.days.contains(&date) { 1.0 } else { 0.0 }),
        );
        row
    }

    /// Fitted values over the history, original scale
    pub fn fitted_values(&self) -> &[f64] {
        &self.fitted
    }

    /// Expected value at each timestamp, original scale
    pub fn predict(&self, timestamps: &[NaiveDateTime]) -> Vec<f64> {
        timestamps
            .iter()
            .map(|ts| dot(&self.design_row(*ts), &self.coefficients) * self.y_scale)
            .collect()
    }

    /// Uncertainty interval around `predictions` at `timestamps`
    ///
    /// Combines the observation noise with the variance of future trend
    /// changes. Changepoints past the history are modelled as arriving at
    /// the historical rate with Laplace magnitudes matching the fitted
    /// ones, giving a trend variance of `2 r b^2 (t - 1)^3 / 3` at scaled
    /// time `t > 1`.
    pub fn intervals(
        &self,
        timestamps: &[NaiveDateTime],
        predictions: &[f64],
    ) -> Result<ConfidenceBounds> {
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| ForecastError::InvalidParameter(e.to_string()))?;
        let z = normal.inverse_cdf(0.5 + self.interval_width / 2.0);

        let deltas = &self.coefficients[2..2 + self.changepoints.len()];
        let rate = self.changepoints.len() as f64;
        let mean_abs_delta = if deltas.is_empty() {
            0.0
        } else {
            deltas.iter().map(|d| d.abs()).sum::<f64>() / deltas.len() as f64
        };

        let (lower, upper) = timestamps
            .iter()
            .zip(predictions)
            .map(|(ts, prediction)| {
                let ahead = (self.scaled_time(*ts) - 1.0).max(0.0);
                let trend_variance = 2.0 * rate * mean_abs_delta.powi(2) * ahead.powi(3) / 3.0;
                let margin = z * (self.sigma2 + trend_variance).sqrt() * self.y_scale;
                (prediction - margin, prediction + margin)
            })
            .unzip();

        Ok(ConfidenceBounds {
            lower,
            upper,
            level: self.interval_width,
        })
    }
}

impl ForecastStrategy for ProphetStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Prophet
    }

    fn fit_and_forecast_within(
        &self,
        series: &TimeSeries,
        horizon: usize,
        budget: &FitBudget,
    ) -> Result<ForecastResult> {
        validate_horizon(horizon)?;
        let frequency = self.params.frequency.unwrap_or_else(|| series.frequency());
        let last = series
            .last_timestamp()
            .ok_or_else(|| self.fail("empty series"))?;
        let future = frequency.future_index(last, horizon)?;

        let model = self.fit(series, budget)?;

        // predict over history and future together, keep the trailing horizon
        let extended: Vec<NaiveDateTime> = series
            .timestamps()
            .iter()
            .copied()
            .chain(future.iter().copied())
            .collect();
        let predictions = model.predict(&extended);
        let forecast = predictions[series.len()..].to_vec();
        let bounds = model.intervals(&future, &forecast)?;

        let in_sample = forecast_accuracy(model.fitted_values(), series.values())?;
        info!(
            horizon,
            frequency = %frequency,
            in_sample_mae = in_sample.mae,
            "Prophet forecast complete"
        );

        ForecastResult::new(StrategyKind::Prophet, future, forecast)?
            .with_bounds(bounds)
            .map(|result| {
                result.with_diagnostics(FitDiagnostics {
                    in_sample: Some(in_sample),
                    ..FitDiagnostics::default()
                })
            })
    }
}
