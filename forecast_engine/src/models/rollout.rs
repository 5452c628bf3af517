//! Recursive multi-step forecasting from a one-step model

use crate::error::{ForecastError, Result};
use std::collections::VecDeque;

/// A model that predicts the value following a fixed-length window
pub trait OneStepPredictor {
    /// Number of trailing values the predictor looks at
    fn window_len(&self) -> usize;

    /// Predict the next value from `window`, oldest value first
    fn predict_next(&self, window: &[f64]) -> Result<f64>;
}

/// Forecast `horizon` steps by feeding each prediction back into the window
///
/// `history` must hold at least [`OneStepPredictor::window_len`] values;
/// only the trailing window is used. The predictor is called exactly
/// `horizon` times.
pub fn recursive_rollout<P>(predictor: &P, history: &[f64], horizon: usize) -> Result<Vec<f64>>
where
    P: OneStepPredictor + ?Sized,
{
    let len = predictor.window_len();
    if history.len() < len {
        return Err(ForecastError::Forecasting(format!(
            "Rollout needs {len} seed values, got {}",
            history.len()
        )));
    }

    let mut window: VecDeque<f64> = history[history.len() - len..].iter().copied().collect();
    let mut forecasts = Vec::with_capacity(horizon);
    for step in 1..=horizon {
        let next = predictor.predict_next(window.make_contiguous())?;
        if !next.is_finite() {
            return Err(ForecastError::Forecasting(format!(
                "Rollout produced a non-finite value at step {step}"
            )));
        }
        forecasts.push(next);
        window.push_back(next);
        if window.len() > len {
            window.pop_front();
        }
    }
    Ok(forecasts)
}
