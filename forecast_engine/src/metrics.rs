//! Accuracy metrics for comparing forecasts with observed values

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use series_math::stats::mean_absolute_error;
use std::fmt;

/// Forecast accuracy metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastAccuracy {
    /// Mean Absolute Error
    pub mae: f64,
    /// Mean Squared Error
    pub mse: f64,
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Mean Absolute Percentage Error over non-zero actuals, `None` if all are zero
    pub mape: Option<f64>,
    /// Symmetric Mean Absolute Percentage Error
    pub smape: f64,
}

/// Calculate accuracy metrics for a forecast vs actual values
pub fn forecast_accuracy(forecast: &[f64], actual: &[f64]) -> Result<ForecastAccuracy> {
    if forecast.len() != actual.len() || forecast.is_empty() {
        return Err(ForecastError::InvalidParameter(format!(
            "Forecast ({}) and actual ({}) values must have the same non-zero length",
            forecast.len(),
            actual.len()
        )));
    }

    let n = forecast.len() as f64;
    let errors: Vec<f64> = forecast
        .iter()
        .zip(actual)
        .map(|(&f, &a)| a - f)
        .collect();

    let mae = mean_absolute_error(forecast, actual)?;
    let mse = errors.iter().map(|e| e.powi(2)).sum::<f64>() / n;

    let percentage: Vec<f64> = actual
        .iter()
        .zip(&errors)
        .filter(|(&a, _)| a != 0.0)
        .map(|(&a, &e)| e.abs() / a.abs() * 100.0)
        .collect();
    let mape = (!percentage.is_empty())
        .then(|| percentage.iter().sum::<f64>() / percentage.len() as f64);

    let smape = actual
        .iter()
        .zip(forecast)
        .map(|(&a, &f)| {
            let denom = a.abs() + f.abs();
            if denom == 0.0 {
                0.0
            } else {
                200.0 * (a - f).abs() / denom
            }
        })
        .sum::<f64>()
        / n;

    Ok(ForecastAccuracy {
        mae,
        mse,
        rmse: mse.sqrt(),
        mape,
        smape,
    })
}

impl fmt::Display for ForecastAccuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Forecast Accuracy Metrics:")?;
        writeln!(f, "  MAE:   {:.4}", self.mae)?;
        writeln!(f, "  MSE:   {:.4}", self.mse)?;
        writeln!(f, "  RMSE:  {:.4}", self.rmse)?;
        match self.mape {
            Some(mape) => writeln!(f, "  MAPE:  {mape:.4}%")?,
            None => writeln!(f, "  MAPE:  n/a")?,
        }
        writeln!(f, "  SMAPE: {:.4}%", self.smape)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forecast_accuracy() {
        let accuracy = forecast_accuracy(&[110.0, 90.0], &[100.0, 100.0]).unwrap();
        assert_eq!(accuracy.mae, 10.0);
        assert_eq!(accuracy.mse, 100.0);
        assert_eq!(accuracy.rmse, 10.0);
        assert_eq!(accuracy.mape, Some(10.0));
    }

    #[test]
    fn test_mape_skips_zero_actuals() {
        let accuracy = forecast_accuracy(&[1.0, 2.0], &[0.0, 0.0]).unwrap();
        assert_eq!(accuracy.mape, None);
        assert!(accuracy.to_string().contains("n/a"));
    }

    #[test]
    fn test_length_mismatch() {
        assert!(forecast_accuracy(&[1.0], &[1.0, 2.0]).is_err());
        assert!(forecast_accuracy(&[], &[]).is_err());
    }

    #[test]
    fn test_mae_matches_shared_helper() {
        let forecast = [3.0, -1.0, 4.0];
        let actual = [1.0, 1.0, 1.0];
        let accuracy = forecast_accuracy(&forecast, &actual).unwrap();
        assert_eq!(accuracy.mae, mean_absolute_error(&forecast, &actual).unwrap());
        assert!((accuracy.mae - 7.0 / 3.0).abs() < 1e-12);
    }
}
