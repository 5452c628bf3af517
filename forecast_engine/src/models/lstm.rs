//! Single-layer LSTM regressor trained on sliding windows
//!
//! The strategy runs Scale -> Window -> Train -> Recursive-Forecast ->
//! Inverse-Scale. Values are min-max scaled, every window of `lookback`
//! consecutive values is paired with the value that follows it, and a
//! network of one LSTM layer plus a linear head is trained with Adam on the
//! mean squared error using full backpropagation through time.

use crate::budget::FitBudget;
use crate::data::TimeSeries;
use crate::error::{ForecastError, Result};
use crate::models::rollout::{recursive_rollout, OneStepPredictor};
use crate::models::{validate_horizon, FitDiagnostics, ForecastResult, ForecastStrategy, StrategyKind};
use crate::utils::train_test_split;
use ndarray::{s, Array, Array1, Array2, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use series_math::MinMaxScaler;
use tracing::{debug, info, warn};

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-7;

/// LSTM training options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LstmParams {
    /// Window length fed to the network
    pub lookback: usize,
    /// Passes over the training windows
    pub epochs: usize,
    pub hidden_size: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Trailing share of windows held out for validation loss
    pub validation_split: f64,
    pub seed: u64,
    /// Fit the scaler on the training windows only instead of the full series
    pub scaler_fit_on_train_only: bool,
}

impl Default for LstmParams {
    fn default() -> Self {
        Self {
            lookback: 10,
            epochs: 20,
            hidden_size: 50,
            batch_size: 32,
            learning_rate: 0.001,
            validation_split: 0.2,
            seed: 42,
            scaler_fit_on_train_only: false,
        }
    }
}

impl LstmParams {
    pub fn new(lookback: usize, epochs: usize) -> Self {
        Self {
            lookback,
            epochs,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.lookback == 0 || self.hidden_size == 0 || self.batch_size == 0 {
            return Err(ForecastError::InvalidParameter(
                "lookback, hidden_size and batch_size must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(ForecastError::InvalidParameter(format!(
                "validation_split must be in [0, 1), got {}",
                self.validation_split
            )));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ForecastError::InvalidParameter(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Weights of the recurrent layer and the dense head
///
/// Gate blocks are stacked in the order input, forget, cell, output, so the
/// first dimension of `w_input`, `w_recurrent` and `bias` is `4 * hidden`.
/// The same layout doubles as gradient and Adam moment storage.
#[derive(Debug, Clone)]
struct LstmNetwork {
    hidden: usize,
    w_input: Array1<f64>,
    w_recurrent: Array2<f64>,
    bias: Array1<f64>,
    w_out: Array1<f64>,
    b_out: f64,
}

/// Activations of one time step kept for backpropagation
struct StepCache {
    x: f64,
    h_prev: Array1<f64>,
    c_prev: Array1<f64>,
    input: Array1<f64>,
    forget: Array1<f64>,
    cell: Array1<f64>,
    output: Array1<f64>,
    c: Array1<f64>,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn glorot(rng: &mut StdRng, fan_in: usize, fan_out: usize, shape: (usize, usize)) -> Array2<f64> {
    let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
    let uniform = Uniform::new_inclusive(-limit, limit);
    Array2::from_shape_simple_fn(shape, || uniform.sample(rng))
}

impl LstmNetwork {
    fn zeros(hidden: usize) -> Self {
        Self {
            hidden,
            w_input: Array1::zeros(4 * hidden),
            w_recurrent: Array2::zeros((4 * hidden, hidden)),
            bias: Array1::zeros(4 * hidden),
            w_out: Array1::zeros(hidden),
            b_out: 0.0,
        }
    }

    fn initialise(hidden: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let w_input = glorot(&mut rng, 1, 4 * hidden, (4 * hidden, 1)).column(0).to_owned();
        let w_recurrent = glorot(&mut rng, hidden, 4 * hidden, (4 * hidden, hidden));
        let w_out = glorot(&mut rng, hidden, 1, (hidden, 1)).column(0).to_owned();

        let mut bias = Array1::zeros(4 * hidden);
        bias.slice_mut(s![hidden..2 * hidden]).fill(1.0);

        Self {
            hidden,
            w_input,
            w_recurrent,
            bias,
            w_out,
            b_out: 0.0,
        }
    }

    /// Run the window through the network, returning the prediction and step caches
    fn forward(&self, window: &[f64]) -> (f64, Vec<StepCache>) {
        let h = self.hidden;
        let mut h_state: Array1<f64> = Array1::zeros(h);
        let mut c_state: Array1<f64> = Array1::zeros(h);
        let mut caches = Vec::with_capacity(window.len());

        for &x in window {
            let pre = &self.w_input * x + self.w_recurrent.dot(&h_state) + &self.bias;
            let input = pre.slice(s![0..h]).mapv(sigmoid);
            let forget = pre.slice(s![h..2 * h]).mapv(sigmoid);
            let cell = pre.slice(s![2 * h..3 * h]).mapv(f64::tanh);
            let output = pre.slice(s![3 * h..4 * h]).mapv(sigmoid);

            let c = &forget * &c_state + &input * &cell;
            let h_next = &output * &c.mapv(f64::tanh);

            caches.push(StepCache {
                x,
                h_prev: std::mem::replace(&mut h_state, h_next),
                c_prev: std::mem::replace(&mut c_state, c.clone()),
                input,
                forget,
                cell,
                output,
                c,
            });
        }

        let prediction = self.w_out.dot(&h_state) + self.b_out;
        (prediction, caches)
    }

    fn predict(&self, window: &[f64]) -> f64 {
        self.forward(window).0
    }

    /// Accumulate gradients of the loss into `grads` given `d_prediction`
    fn backward(&self, caches: &[StepCache], d_prediction: f64, grads: &mut LstmNetwork) {
        let h = self.hidden;
        let Some(last) = caches.last() else {
            return;
        };
        let h_last = &last.output * &last.c.mapv(f64::tanh);

        grads.w_out.scaled_add(d_prediction, &h_last);
        grads.b_out += d_prediction;

        let mut dh = &self.w_out * d_prediction;
        let mut dc: Array1<f64> = Array1::zeros(h);

        for step in caches.iter().rev() {
            let tanh_c = step.c.mapv(f64::tanh);
            let d_output = &dh * &tanh_c;
            dc = dc + &dh * &step.output * &tanh_c.mapv(|t| 1.0 - t * t);

            let d_input = &dc * &step.cell;
            let d_cell = &dc * &step.input;
            let d_forget = &dc * &step.c_prev;

            let mut d_pre: Array1<f64> = Array1::zeros(4 * h);
            d_pre
                .slice_mut(s![0..h])
                .assign(&(&d_input * &step.input.mapv(|v| v * (1.0 - v))));
            d_pre
                .slice_mut(s![h..2 * h])
                .assign(&(&d_forget * &step.forget.mapv(|v| v * (1.0 - v))));
            d_pre
                .slice_mut(s![2 * h..3 * h])
                .assign(&(&d_cell * &step.cell.mapv(|v| 1.0 - v * v)));
            d_pre
                .slice_mut(s![3 * h..4 * h])
                .assign(&(&d_output * &step.output.mapv(|v| v * (1.0 - v))));

            grads.w_input.scaled_add(step.x, &d_pre);
            grads.bias += &d_pre;
            let outer = d_pre
                .view()
                .insert_axis(Axis(1))
                .dot(&step.h_prev.view().insert_axis(Axis(0)));
            grads.w_recurrent += &outer;

            dh = self.w_recurrent.t().dot(&d_pre);
            dc = &dc * &step.forget;
        }
    }
}

/// Adam optimiser state
struct Adam {
    learning_rate: f64,
    first: LstmNetwork,
    second: LstmNetwork,
    step: i32,
}

fn adam_update<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    first: &mut Array<f64, D>,
    second: &mut Array<f64, D>,
    rate: f64,
) {
    Zip::from(param)
        .and(grad)
        .and(first)
        .and(second)
        .for_each(|p, &g, m, v| {
            *m = BETA1 * *m + (1.0 - BETA1) * g;
            *v = BETA2 * *v + (1.0 - BETA2) * g * g;
            *p -= rate * *m / (v.sqrt() + EPSILON);
        });
}

impl Adam {
    fn new(hidden: usize, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            first: LstmNetwork::zeros(hidden),
            second: LstmNetwork::zeros(hidden),
            step: 0,
        }
    }

    fn apply(&mut self, network: &mut LstmNetwork, grads: &LstmNetwork) {
        self.step += 1;
        let rate = self.learning_rate * (1.0 - BETA2.powi(self.step)).sqrt()
            / (1.0 - BETA1.powi(self.step));

        adam_update(
            &mut network.w_input,
            &grads.w_input,
            &mut self.first.w_input,
            &mut self.second.w_input,
            rate,
        );
        adam_update(
            &mut network.w_recurrent,
            &grads.w_recurrent,
            &mut self.first.w_recurrent,
            &mut self.second.w_recurrent,
            rate,
        );
        adam_update(
            &mut network.bias,
            &grads.bias,
            &mut self.first.bias,
            &mut self.second.bias,
            rate,
        );
        adam_update(
            &mut network.w_out,
            &grads.w_out,
            &mut self.first.w_out,
            &mut self.second.w_out,
            rate,
        );

        let g = grads.b_out;
        self.first.b_out = BETA1 * self.first.b_out + (1.0 - BETA1) * g;
        self.second.b_out = BETA2 * self.second.b_out + (1.0 - BETA2) * g * g;
        network.b_out -= rate * self.first.b_out / (self.second.b_out.sqrt() + EPSILON);
    }
}

/// LSTM strategy
#[derive(Debug, Clone, Default)]
pub struct LstmStrategy {
    params: LstmParams,
}

/// Trained network plus the scaler it was trained under
#[derive(Debug, Clone)]
pub struct FittedLstm {
    network: LstmNetwork,
    scaler: MinMaxScaler,
    lookback: usize,
    train_loss: Vec<f64>,
    validation_loss: Vec<f64>,
}

impl ForecastStrategy for LstmStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Lstm
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
        let forecast = fitted.forecast(series.values(), horizon)?;

        info!(
            lookback = self.params.lookback,
            epochs = self.params.epochs,
            horizon,
            final_train_loss = fitted.train_loss.last().copied(),
            "LSTM forecast complete"
        );

        Ok(ForecastResult::new(StrategyKind::Lstm, index, forecast)?
            .with_diagnostics(fitted.diagnostics()))
    }
}

impl LstmStrategy {
    pub fn new(params: LstmParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &LstmParams {
        &self.params
    }

    fn fail(&self, reason: impl Into<String>) -> ForecastError {
        ForecastError::model_fit(StrategyKind::Lstm, reason)
    }

    /// Train a network on `values`
    pub fn fit(&self, values: &[f64], budget: &FitBudget) -> Result<FittedLstm> {
        self.params.validate()?;
        let lookback = self.params.lookback;
        let window_count = values.len().saturating_sub(lookback);
        if window_count < 2 {
            return Err(self.fail(format!(
                "lookback {lookback} leaves {window_count} training windows in {} observations; at least 2 are needed",
                values.len()
            )));
        }

        // window i covers values[i..i + lookback] and predicts values[i + lookback]
        let starts: Vec<usize> = (0..window_count).collect();
        let (train, validation) = train_test_split(&starts, self.params.validation_split);
        if train.is_empty() {
            return Err(self.fail(format!(
                "validation_split {} leaves no training windows out of {window_count}",
                self.params.validation_split
            )));
        }

        let scaler = if self.params.scaler_fit_on_train_only {
            MinMaxScaler::fit(&values[..train.len() + lookback])?
        } else {
            warn!("LSTM scaler is fitted on the full series, including validation windows");
            MinMaxScaler::fit(values)?
        };
        let scaled = scaler.transform(values);

        let mut network = LstmNetwork::initialise(self.params.hidden_size, self.params.seed);
        let mut adam = Adam::new(self.params.hidden_size, self.params.learning_rate);
        let mut train_loss = Vec::with_capacity(self.params.epochs);
        let mut validation_loss = Vec::with_capacity(self.params.epochs);

        for epoch in 0..self.params.epochs {
            let mut total = 0.0;
            for batch in train.chunks(self.params.batch_size) {
                budget.check("LSTM training")?;

                let mut grads = LstmNetwork::zeros(self.params.hidden_size);
                let scale = 2.0 / batch.len() as f64;
                for &start in batch {
                    let (prediction, caches) = network.forward(&scaled[start..start + lookback]);
                    let error = prediction - scaled[start + lookback];
                    total += error * error;
                    network.backward(&caches, scale * error, &mut grads);
                }
                adam.apply(&mut network, &grads);
            }

            let epoch_loss = total / train.len() as f64;
            if !epoch_loss.is_finite() {
                return Err(self.fail(format!("training loss diverged at epoch {}", epoch + 1)));
            }
            train_loss.push(epoch_loss);

            if !validation.is_empty() {
                let loss = validation
                    .iter()
                    .map(|&start| {
                        let error = network.predict(&scaled[start..start + lookback])
                            - scaled[start + lookback];
                        error * error
                    })
                    .sum::<f64>()
                    / validation.len() as f64;
                validation_loss.push(loss);
            }

            debug!(
                epoch = epoch + 1,
                train_loss = epoch_loss,
                validation_loss = validation_loss.last().copied(),
                "LSTM epoch"
            );
        }

        Ok(FittedLstm {
            network,
            scaler,
            lookback,
            train_loss,
            validation_loss,
        })
    }
}

impl OneStepPredictor for FittedLstm {
    fn window_len(&self) -> usize {
        self.lookback
    }

    /// Expects and returns scaled values
    fn predict_next(&self, window: &[f64]) -> Result<f64> {
        Ok(self.network.predict(window))
    }
}

impl FittedLstm {
    /// Per-epoch mean squared error on the training windows, scaled units
    pub fn train_loss(&self) -> &[f64] {
        &self.train_loss
    }

    pub fn validation_loss(&self) -> &[f64] {
        &self.validation_loss
    }

    /// Roll forward `horizon` steps from the end of `history`, original units
    pub fn forecast(&self, history: &[f64], horizon: usize) -> Result<Vec<f64>> {
        let scaled = self.scaler.transform(history);
        let forecasts = recursive_rollout(self, &scaled, horizon)?;
        Ok(self.scaler.inverse_transform(&forecasts))
    }

    pub fn diagnostics(&self) -> FitDiagnostics {
        FitDiagnostics {
            train_loss: self.train_loss.clone(),
            validation_loss: self.validation_loss.clone(),
            ..FitDiagnostics::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::CancellationToken;

    fn small_params() -> LstmParams {
        LstmParams {
            lookback: 4,
            epochs: 30,
            hidden_size: 8,
            batch_size: 8,
            learning_rate: 0.01,
            ..LstmParams::default()
        }
    }

    fn wave(n: usize) -> Vec<f64> {
        (0..n).map(|i| 10.0 + (i as f64 * 0.5).sin()).collect()
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let network = LstmNetwork::initialise(3, 7);
        let window = [0.2, 0.5, 0.1];
        let target = 0.4;

        let (prediction, caches) = network.forward(&window);
        let mut grads = LstmNetwork::zeros(3);
        network.backward(&caches, 2.0 * (prediction - target), &mut grads);

        let loss = |net: &LstmNetwork| (net.predict(&window) - target).powi(2);
        let eps = 1e-6;
        for (row, col) in [(0, 0), (4, 1), (7, 2), (11, 0)] {
            let mut plus = network.clone();
            plus.w_recurrent[[row, col]] += eps;
            let mut minus = network.clone();
            minus.w_recurrent[[row, col]] -= eps;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            assert!(
                (numeric - grads.w_recurrent[[row, col]]).abs() < 1e-6,
                "w_recurrent[{row}][{col}]: {numeric} vs {}",
                grads.w_recurrent[[row, col]]
            );
        }
        for i in [0, 3, 5, 9] {
            let mut plus = network.clone();
            plus.w_input[i] += eps;
            let mut minus = network.clone();
            minus.w_input[i] -= eps;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            assert!((numeric - grads.w_input[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_training_reduces_loss() {
        let fitted = LstmStrategy::new(small_params())
            .fit(&wave(80), &FitBudget::unbounded())
            .unwrap();
        let losses = fitted.train_loss();
        assert_eq!(losses.len(), 30);
        assert!(losses[29] < losses[0]);
        assert_eq!(fitted.validation_loss().len(), 30);
    }

    #[test]
    fn test_same_seed_same_forecast() {
        let values = wave(40);
        let strategy = LstmStrategy::new(LstmParams {
            epochs: 3,
            ..small_params()
        });
        let a = strategy.fit(&values, &FitBudget::unbounded()).unwrap();
        let b = strategy.fit(&values, &FitBudget::unbounded()).unwrap();
        assert_eq!(a.forecast(&values, 5).unwrap(), b.forecast(&values, 5).unwrap());
    }

    #[test]
    fn test_needs_two_windows() {
        let err = LstmStrategy::new(LstmParams::new(5, 1))
            .fit(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &FitBudget::unbounded())
            .unwrap_err();
        assert!(matches!(err, ForecastError::ModelFit { strategy: StrategyKind::Lstm, .. }));
    }

    #[test]
    fn test_validation_split_must_leave_training_windows() {
        let params = LstmParams {
            validation_split: 0.6,
            ..small_params()
        };
        let err = LstmStrategy::new(params)
            .fit(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &FitBudget::unbounded())
            .unwrap_err();
        assert!(matches!(err, ForecastError::ModelFit { strategy: StrategyKind::Lstm, .. }));
        assert!(err.to_string().contains("validation_split"), "{err}");
    }

    #[test]
    fn test_cancelled_training_is_interrupted() {
        let token = CancellationToken::new();
        token.cancel();
        let budget = FitBudget::unbounded().with_token(token);
        let err = LstmStrategy::new(small_params())
            .fit(&wave(40), &budget)
            .unwrap_err();
        assert!(matches!(err, ForecastError::Interrupted(_)));
    }

    #[test]
    fn test_train_only_scaler_ignores_validation_range() {
        let mut values = vec![1.0; 20];
        values.extend([100.0; 5]);
        let params = LstmParams {
            epochs: 1,
            validation_split: 0.25,
            scaler_fit_on_train_only: true,
            ..small_params()
        };
        let fitted = LstmStrategy::new(params)
            .fit(&values, &FitBudget::unbounded())
            .unwrap();
        assert!(fitted.scaler.max() < 100.0);
    }
}
