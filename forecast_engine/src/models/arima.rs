//! ARIMA models for time series forecasting
//!
//! The series is differenced `d` times and an ARMA(p, q) model is fitted
//! to the result. Pure autoregressions are estimated by conditional least
//! squares. Models with moving-average terms use Hannan-Rissanen: a long
//! autoregression supplies residual estimates, the ARMA regression is run
//! on lagged values and those residuals, and the regression is repeated on
//! recursively recomputed residuals until the coefficients settle.

use crate::budget::FitBudget;
use crate::data::TimeSeries;
use crate::error::{ForecastError, Result};
use crate::models::{
    validate_horizon, ConfidenceBounds, FitDiagnostics, ForecastResult, ForecastStrategy,
    StrategyKind,
};
use serde::{Deserialize, Serialize};
use series_math::linalg::least_squares;
use series_math::stats::{difference, difference_tails, integrate, mean};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{debug, info};

/// Highest supported differencing order
const MAX_DIFFERENCING: usize = 2;

const MAX_REFINEMENT_ITERATIONS: usize = 50;
const REFINEMENT_TOLERANCE: f64 = 1e-8;

/// ARIMA order and options
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArimaParams {
    /// AR order
    pub p: usize,
    /// Differencing order
    pub d: usize,
    /// MA order
    pub q: usize,
    /// Include an intercept; `None` includes one only when `d == 0`
    pub include_constant: Option<bool>,
    /// Attach confidence bounds at this coverage, e.g. `0.95`
    pub confidence_level: Option<f64>,
}

impl Default for ArimaParams {
    fn default() -> Self {
        Self {
            p: 1,
            d: 1,
            q: 1,
            include_constant: None,
            confidence_level: None,
        }
    }
}

impl ArimaParams {
    pub fn new(p: usize, d: usize, q: usize) -> Self {
        Self {
            p,
            d,
            q,
            ..Self::default()
        }
    }

    pub fn with_confidence_level(mut self, level: f64) -> Self {
        self.confidence_level = Some(level);
        self
    }

    pub fn with_constant(mut self, include: bool) -> Self {
        self.include_constant = Some(include);
        self
    }

    fn has_constant(&self) -> bool {
        self.include_constant.unwrap_or(self.d == 0)
    }
}

/// ARIMA strategy (AutoRegressive Integrated Moving Average)
#[derive(Debug, Clone, Default)]
pub struct ArimaStrategy {
    params: ArimaParams,
}

/// ARIMA model fitted to a series
#[derive(Debug, Clone)]
pub struct FittedArima {
    params: ArimaParams,
    constant: f64,
    ar_coefficients: Vec<f64>,
    ma_coefficients: Vec<f64>,
    /// The series after differencing
    differenced: Vec<f64>,
    /// Recursively computed residuals aligned with `differenced`
    residuals: Vec<f64>,
    /// Last value of each differencing level, for integration
    tails: Vec<f64>,
    sigma2: f64,
    aic: f64,
}

/// Coefficients of one ARMA regression
struct ArmaEstimate {
    constant: f64,
    ar: Vec<f64>,
    ma: Vec<f64>,
}

impl ArimaStrategy {
    pub fn new(params: ArimaParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ArimaParams {
        &self.params
    }

    fn fail(&self, reason: impl Into<String>) -> ForecastError {
        ForecastError::model_fit(StrategyKind::Arima, reason)
    }

    /// Estimate the model on `values`
    pub fn fit(&self, values: &[f64], budget: &FitBudget) -> Result<FittedArima> {
        let ArimaParams { p, d, q, .. } = self.params;
        let label = format!("ARIMA({p},{d},{q})");

        if d > MAX_DIFFERENCING {
            return Err(self.fail(format!(
                "{label}: differencing order above {MAX_DIFFERENCING} is not supported"
            )));
        }
        if let Some(level) = self.params.confidence_level {
            if !(level > 0.0 && level < 1.0) {
                return Err(ForecastError::InvalidParameter(format!(
                    "Confidence level must be between 0 and 1, got {level}"
                )));
            }
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(self.fail(format!("{label}: series contains non-finite values")));
        }

        let constant = self.params.has_constant();
        let parameter_count = p + q + usize::from(constant);
        // conditional estimation loses the first p observations
        let needed = d + p + parameter_count + 1;
        if values.len() < needed {
            return Err(self.fail(format!(
                "{label} needs at least {needed} observations, got {}",
                values.len()
            )));
        }

        let differenced = difference(values, d)?;
        let tails = difference_tails(values, d)?;

        let estimate = if q == 0 {
            self.conditional_least_squares(&differenced, p, constant)?
        } else {
            self.hannan_rissanen(&differenced, constant, budget)?
        };

        let residuals = arma_residuals(&differenced, &estimate);
        let effective = &residuals[p..];
        if effective.iter().any(|r| !r.is_finite()) {
            return Err(self.fail(format!("{label}: residuals diverged")));
        }
        let sigma2 = mean(&effective.iter().map(|r| r * r).collect::<Vec<_>>())
            .ok_or_else(|| self.fail(format!("{label}: no residuals to estimate variance")))?;

        let n = effective.len() as f64;
        let log_likelihood =
            -0.5 * n * ((2.0 * std::f64::consts::PI * sigma2.max(f64::MIN_POSITIVE)).ln() + 1.0);
        let aic = -2.0 * log_likelihood + 2.0 * (parameter_count + 1) as f64;

        debug!(
            order = %label,
            constant = estimate.constant,
            ar = ?estimate.ar,
            ma = ?estimate.ma,
            sigma2,
            aic,
            "fitted ARIMA"
        );

        Ok(FittedArima {
            params: self.params,
            constant: estimate.constant,
            ar_coefficients: estimate.ar,
            ma_coefficients: estimate.ma,
            differenced,
            residuals,
            tails,
            sigma2,
            aic,
        })
    }

    /// Regress `w_t` on its own `p` lags
    fn conditional_least_squares(&self, w: &[f64], p: usize, constant: bool) -> Result<ArmaEstimate> {
        if p == 0 {
            let c = if constant { mean(w).unwrap_or(0.0) } else { 0.0 };
            return Ok(ArmaEstimate {
                constant: c,
                ar: Vec::new(),
                ma: Vec::new(),
            });
        }

        let design: Vec<Vec<f64>> = (p..w.len())
            .map(|t| regressors(w, &[], t, p, 0, constant))
            .collect();
        let coefficients = least_squares(&design, &w[p..])
            .map_err(|e| self.fail(format!("autoregression failed: {e}")))?;
        Ok(split_coefficients(&coefficients, p, 0, constant))
    }

    fn hannan_rissanen(&self, w: &[f64], constant: bool, budget: &FitBudget) -> Result<ArmaEstimate> {
        let ArimaParams { p, q, .. } = self.params;
        let m = w.len();

        // long autoregression for initial innovations
        let long_order = (p + q)
            .max((m as f64).ln().powi(2).floor() as usize)
            .min(m.saturating_sub(2) / 2);
        if long_order == 0 || long_order + q.max(p) + p + q + usize::from(constant) >= m {
            return Err(self.fail(format!(
                "{} observations after differencing are too few to estimate MA({q}) terms",
                m
            )));
        }
        let long_ar = self.conditional_least_squares(w, long_order, constant)?;
        let mut innovations = vec![0.0; m];
        for t in long_order..m {
            innovations[t] = w[t] - predict_ar(w, &long_ar, t);
        }

        let start = p.max(long_order + q);
        let mut estimate = self.arma_regression(w, &innovations, start, constant)?;

        for iteration in 0..MAX_REFINEMENT_ITERATIONS {
            budget.check("ARIMA refinement")?;

            let residuals = arma_residuals(w, &estimate);
            if residuals.iter().any(|r| !r.is_finite()) {
                return Err(self.fail("residual recursion diverged; the MA part may be non-invertible"));
            }
            let next = self.arma_regression(w, &residuals, p.max(q), constant)?;

            let change = coefficient_change(&estimate, &next);
            estimate = next;
            if change < REFINEMENT_TOLERANCE {
                debug!(iteration, "Hannan-Rissanen converged");
                break;
            }
        }

        if estimate
            .ar
            .iter()
            .chain(&estimate.ma)
            .chain(std::iter::once(&estimate.constant))
            .any(|c| !c.is_finite())
        {
            return Err(self.fail("estimated coefficients are not finite"));
        }
        Ok(estimate)
    }

    /// Regress `w_t` on `p` lags of itself and `q` lags of `innovations`
    fn arma_regression(
        &self,
        w: &[f64],
        innovations: &[f64],
        start: usize,
        constant: bool,
    ) -> Result<ArmaEstimate> {
        let ArimaParams { p, q, .. } = self.params;
        let design: Vec<Vec<f64>> = (start..w.len())
            .map(|t| regressors(w, innovations, t, p, q, constant))
            .collect();
        if design.len() <= p + q + usize::from(constant) {
            return Err(self.fail(format!(
                "{} usable rows are too few for {} coefficients",
                design.len(),
                p + q + usize::from(constant)
            )));
        }
        let coefficients = least_squares(&design, &w[start..])
            .map_err(|e| self.fail(format!("ARMA regression failed: {e}")))?;
        Ok(split_coefficients(&coefficients, p, q, constant))
    }
}

fn regressors(w: &[f64], innovations: &[f64], t: usize, p: usize, q: usize, constant: bool) -> Vec<f64> {
    let mut row = Vec::with_capacity(p + q + 1);
    if constant {
        row.push(1.0);
    }
    row.extend((1..=p).map(|i| w[t - i]));
    row.extend((1..=q).map(|j| innovations[t - j]));
    row
}

fn split_coefficients(coefficients: &[f64], p: usize, q: usize, constant: bool) -> ArmaEstimate {
    let offset = usize::from(constant);
    ArmaEstimate {
        constant: if constant { coefficients[0] } else { 0.0 },
        ar: coefficients[offset..offset + p].to_vec(),
        ma: coefficients[offset + p..offset + p + q].to_vec(),
    }
}

fn predict_ar(w: &[f64], estimate: &ArmaEstimate, t: usize) -> f64 {
    estimate.constant
        + estimate
            .ar
            .iter()
            .enumerate()
            .map(|(i, phi)| phi * w[t - i - 1])
            .sum::<f64>()
}

/// Conditional residuals; the first `p` are zero
fn arma_residuals(w: &[f64], estimate: &ArmaEstimate) -> Vec<f64> {
    let p = estimate.ar.len();
    let mut residuals = vec![0.0; w.len()];
    for t in p..w.len() {
        let ma: f64 = estimate
            .ma
            .iter()
            .enumerate()
            .filter(|(j, _)| t > *j)
            .map(|(j, theta)| theta * residuals[t - j - 1])
            .sum();
        residuals[t] = w[t] - predict_ar(w, estimate, t) - ma;
    }
    residuals
}

fn coefficient_change(a: &ArmaEstimate, b: &ArmaEstimate) -> f64 {
    a.ar.iter()
        .zip(&b.ar)
        .chain(a.ma.iter().zip(&b.ma))
        .map(|(x, y)| (x - y).abs())
        .fold((a.constant - b.constant).abs(), f64::max)
}

impl FittedArima {
    pub fn params(&self) -> &ArimaParams {
        &self.params
    }

    pub fn constant(&self) -> f64 {
        self.constant
    }

    pub fn ar_coefficients(&self) -> &[f64] {
        &self.ar_coefficients
    }

    pub fn ma_coefficients(&self) -> &[f64] {
        &self.ma_coefficients
    }

    pub fn sigma2(&self) -> f64 {
        self.sigma2
    }

    pub fn aic(&self) -> f64 {
        self.aic
    }

    /// Point forecasts on the original scale
    pub fn forecast(&self, horizon: usize) -> Vec<f64> {
        let mut history = self.differenced.clone();
        let mut shocks = self.residuals.clone();

        for _ in 0..horizon {
            let t = history.len();
            let ar: f64 = self
                .ar_coefficients
                .iter()
                .enumerate()
                .map(|(i, phi)| phi * history[t - i - 1])
                .sum();
            let ma: f64 = self
                .ma_coefficients
                .iter()
                .enumerate()
                .filter(|(j, _)| t > *j)
                .map(|(j, theta)| theta * shocks[t - j - 1])
                .sum();
            history.push(self.constant + ar + ma);
            // future shocks have zero expectation
            shocks.push(0.0);
        }

        let steps = &history[self.differenced.len()..];
        integrate(steps, &self.tails)
    }

    /// Psi weights of the integrated model, `psi[0] == 1`
    fn psi_weights(&self, horizon: usize) -> Vec<f64> {
        // phi(B) (1 - B)^d as polynomial coefficients, leading 1
        let mut polynomial: Vec<f64> = std::iter::once(1.0)
            .chain(self.ar_coefficients.iter().map(|phi| -phi))
            .collect();
        for _ in 0..self.params.d {
            let mut next = vec![0.0; polynomial.len() + 1];
            for (i, c) in polynomial.iter().enumerate() {
                next[i] += c;
                next[i + 1] -= c;
            }
            polynomial = next;
        }
        let ar: Vec<f64> = polynomial[1..].iter().map(|c| -c).collect();

        let mut psi = vec![0.0; horizon];
        if horizon > 0 {
            psi[0] = 1.0;
        }
        for j in 1..horizon {
            let ma = self.ma_coefficients.get(j - 1).copied().unwrap_or(0.0);
            let ar_part: f64 = ar
                .iter()
                .take(j)
                .enumerate()
                .map(|(i, a)| a * psi[j - i - 1])
                .sum();
            psi[j] = ma + ar_part;
        }
        psi
    }

    /// Forecast error variance for each step ahead
    pub fn forecast_variance(&self, horizon: usize) -> Vec<f64> {
        let mut cumulative = 0.0;
        self.psi_weights(horizon)
            .into_iter()
            .map(|psi| {
                cumulative += psi * psi;
                self.sigma2 * cumulative
            })
            .collect()
    }

    /// Symmetric normal bounds around `forecast` at `level`
    pub fn confidence_bounds(&self, forecast: &[f64], level: f64) -> Result<ConfidenceBounds> {
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| ForecastError::InvalidParameter(e.to_string()))?;
        let z = normal.inverse_cdf(0.5 + level / 2.0);
        let variance = self.forecast_variance(forecast.len());

        let (lower, upper) = forecast
            .iter()
            .zip(&variance)
            .map(|(f, v)| {
                let margin = z * v.sqrt();
                (f - margin, f + margin)
            })
            .unzip();

        Ok(ConfidenceBounds {
            lower,
            upper,
            level,
        })
    }

    pub fn diagnostics(&self) -> FitDiagnostics {
        FitDiagnostics {
            sigma2: Some(self.sigma2),
            aic: Some(self.aic),
            ar_coefficients: self.ar_coefficients.clone(),
            ma_coefficients: self.ma_coefficients.clone(),
            ..FitDiagnostics::default()
        }
    }
}

impl ForecastStrategy for ArimaStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Arima
    }

    fn fit_and_forecast_within(
        &self,
        series: &TimeSeries,
        horizon: usize,
        budget: &FitBudget,
    ) -> Result<ForecastResult> {
        validate_horizon(horizon)?;
        let index = series.future_index(horizon)?;

        let fitted = self.fit(series.values(), budget)?;
        let forecast = fitted.forecast(horizon);

        info!(
            p = self.params.p,
            d = self.params.d,
            q = self.params.q,
            horizon,
            aic = fitted.aic(),
            "ARIMA forecast complete"
        );

        let mut result = ForecastResult::new(StrategyKind::Arima, index, forecast.clone())?
            .with_diagnostics(fitted.diagnostics());
        if let Some(level) = self.params.confidence_level {
            result = result.with_bounds(fitted.confidence_bounds(&forecast, level)?)?;
        }
        Ok(result)
    }
}
