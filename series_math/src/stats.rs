//! Descriptive statistics and differencing helpers

use crate::{MathError, Result};

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population variance, `None` for an empty slice
pub fn variance(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64)
}

/// Apply `d`-th order differencing
pub fn difference(values: &[f64], d: usize) -> Result<Vec<f64>> {
    if values.len() <= d {
        return Err(MathError::InsufficientData(format!(
            "Differencing of order {d} needs more than {d} values, got {}",
            values.len()
        )));
    }

    let mut current = values.to_vec();
    for _ in 0..d {
        current = current.windows(2).map(|w| w[1] - w[0]).collect();
    }
    Ok(current)
}

/// Last value of every differencing level `0..d`
///
/// Element `k` is the final observation of the series differenced `k` times,
/// which is what [`integrate`] needs to undo `d`-th order differencing.
pub fn difference_tails(values: &[f64], d: usize) -> Result<Vec<f64>> {
    let mut tails = Vec::with_capacity(d);
    for level in 0..d {
        let differenced = difference(values, level)?;
        let last = differenced.last().copied().ok_or_else(|| {
            MathError::InsufficientData("Differenced series is empty".to_string())
        })?;
        tails.push(last);
    }
    Ok(tails)
}

/// Undo differencing of forecasts made on the `d`-times differenced scale
pub fn integrate(forecasts: &[f64], tails: &[f64]) -> Vec<f64> {
    let mut current = forecasts.to_vec();
    for &start in tails.iter().rev() {
        let mut level = start;
        for value in current.iter_mut() {
            level += *value;
            *value = level;
        }
    }
    current
}

/// Mean absolute error between two equally long slices
pub fn mean_absolute_error(predicted: &[f64], actual: &[f64]) -> Result<f64> {
    if predicted.len() != actual.len() || predicted.is_empty() {
        return Err(MathError::InvalidInput(
            "Predicted and actual values must have the same non-zero length".to_string(),
        ));
    }

    Ok(predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a).abs())
        .sum::<f64>()
        / predicted.len() as f64)
}
