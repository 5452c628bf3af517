//! Min-max scaling to the unit interval

use crate::{MathError, Result};
use serde::{Deserialize, Serialize};

/// Scaler mapping `[min, max]` of the fitted data onto `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    min: f64,
    max: f64,
}

impl MinMaxScaler {
    /// Fit the scaler to the observed range of `values`
    pub fn fit(values: &[f64]) -> Result<Self> {
        if values.is_empty() {
            return Err(MathError::InsufficientData(
                "Cannot fit a scaler on an empty slice".to_string(),
            ));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(MathError::InvalidInput(
                "Scaler input contains non-finite values".to_string(),
            ));
        }

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(Self { min, max })
    }

    /// Lower end of the fitted range
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Upper end of the fitted range
    pub fn max(&self) -> f64 {
        self.max
    }

    fn range(&self) -> f64 {
        self.max - self.min
    }

    /// Scale a single value; a constant series maps everything to 0
    pub fn transform_value(&self, value: f64) -> f64 {
        let range = self.range();
        if range == 0.0 {
            0.0
        } else {
            (value - self.min) / range
        }
    }

    /// Map a scaled value back to the original units
    pub fn inverse_value(&self, scaled: f64) -> f64 {
        scaled * self.range() + self.min
    }

    /// Scale every value in `values`
    pub fn transform(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&v| self.transform_value(v)).collect()
    }

    /// Undo [`MinMaxScaler::transform`]
    pub fn inverse_transform(&self, scaled: &[f64]) -> Vec<f64> {
        scaled.iter().map(|&v| self.inverse_value(v)).collect()
    }
}
