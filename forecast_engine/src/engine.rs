//! Strategy dispatch, budgets and multi-request pipelines

use crate::budget::{CancellationToken, FitBudget};
use crate::cache::ForecastCache;
use crate::config::EngineConfig;
use crate::data::{ColumnSelection, DataFrameIngestor, TimeSeries};
use crate::error::{ForecastError, Result};
use crate::models::{
    validate_horizon, ArimaParams, ArimaStrategy, ForecastResult, ForecastStrategy,
    LaggedGbmParams, LaggedGbmStrategy, LstmParams, LstmStrategy, ProphetParams,
    ProphetStrategy, StrategyKind,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Parameters for one strategy, tagged by the strategy name
///
/// ```json
/// {"strategy": "arima", "p": 2, "d": 1, "q": 0}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyParams {
    Arima(ArimaParams),
    Prophet(ProphetParams),
    Lstm(LstmParams),
    LaggedGbm(LaggedGbmParams),
}

impl StrategyParams {
    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategyParams::Arima(_) => StrategyKind::Arima,
            StrategyParams::Prophet(_) => StrategyKind::Prophet,
            StrategyParams::Lstm(_) => StrategyKind::Lstm,
            StrategyParams::LaggedGbm(_) => StrategyKind::LaggedGbm,
        }
    }

    /// Default parameters for `kind`
    pub fn defaults_for(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Arima => StrategyParams::Arima(ArimaParams::default()),
            StrategyKind::Prophet => StrategyParams::Prophet(ProphetParams::default()),
            StrategyKind::Lstm => StrategyParams::Lstm(LstmParams::default()),
            StrategyKind::LaggedGbm => StrategyParams::LaggedGbm(LaggedGbmParams::default()),
        }
    }

    /// Instantiate the strategy these parameters describe
    pub fn build(&self) -> Box<dyn ForecastStrategy> {
        match self {
            StrategyParams::Arima(params) => Box::new(ArimaStrategy::new(*params)),
            StrategyParams::Prophet(params) => Box::new(ProphetStrategy::new(params.clone())),
            StrategyParams::Lstm(params) => Box::new(LstmStrategy::new(params.clone())),
            StrategyParams::LaggedGbm(params) => {
                Box::new(LaggedGbmStrategy::new(params.clone()))
            }
        }
    }
}

/// One forecast to produce from a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRequest {
    /// Number of periods to forecast
    pub horizon: usize,
    pub params: StrategyParams,
    /// Wall-clock limit for fitting; falls back to the engine default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ForecastRequest {
    pub fn new(horizon: usize, params: StrategyParams) -> Self {
        Self {
            horizon,
            params,
            timeout_secs: None,
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// Caller-supplied description of a pipeline run over one upload
///
/// Columns left as `None` are inferred from the table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub date_column: Option<String>,
    pub target_column: Option<String>,
    pub requests: Vec<ForecastRequest>,
}

/// Outcome of a single request inside a pipeline
#[derive(Debug)]
pub struct PipelineOutcome {
    pub request: ForecastRequest,
    pub result: Result<ForecastResult>,
}

impl PipelineOutcome {
    pub fn strategy(&self) -> StrategyKind {
        self.request.params.kind()
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Everything a pipeline run produced
#[derive(Debug)]
pub struct PipelineReport {
    pub columns: ColumnSelection,
    pub series: TimeSeries,
    /// One entry per request, in request order
    pub outcomes: Vec<PipelineOutcome>,
}

impl PipelineReport {
    /// Results of the requests that succeeded
    pub fn successes(&self) -> impl Iterator<Item = &ForecastResult> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    /// Requests that failed along with their errors
    pub fn failures(&self) -> impl Iterator<Item = (&ForecastRequest, &ForecastError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.request, e)))
    }
}

/// Runs forecast requests against ingested series
#[derive(Debug, Clone, Default)]
pub struct ForecastEngine {
    config: EngineConfig,
    ingestor: DataFrameIngestor,
}

impl ForecastEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let ingestor = DataFrameIngestor::new(config.ingest.clone());
        Ok(Self { config, ingestor })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ingestor(&self) -> &DataFrameIngestor {
        &self.ingestor
    }

    /// Run one request
    ///
    /// A zero horizon and a series shorter than `min_observations` are
    /// rejected before any strategy starts fitting.
    pub fn run(&self, series: &TimeSeries, request: &ForecastRequest) -> Result<ForecastResult> {
        self.execute(series, request, None)
    }

    /// Run one request that stops early once `token` is cancelled
    pub fn run_with_token(
        &self,
        series: &TimeSeries,
        request: &ForecastRequest,
        token: &CancellationToken,
    ) -> Result<ForecastResult> {
        self.execute(series, request, Some(token))
    }

    /// Run unrelated jobs in parallel, one fit per thread
    pub fn run_batch(&self, jobs: &[(TimeSeries, ForecastRequest)]) -> Vec<Result<ForecastResult>> {
        jobs.par_iter()
            .map(|(series, request)| self.run(series, request))
            .collect()
    }

    /// Run a request through `cache`, fitting only on a miss
    pub fn run_cached(
        &self,
        cache: &ForecastCache,
        series: &TimeSeries,
        request: &ForecastRequest,
    ) -> Result<ForecastResult> {
        cache.get_or_forecast(series, request, || self.run(series, request))
    }

    /// Ingest an uploaded CSV and run every request in `pipeline` against it
    ///
    /// Ingestion failures abort the run. Each request then succeeds or fails
    /// on its own.
    pub fn run_pipeline(&self, csv_bytes: &[u8], pipeline: &PipelineConfig) -> Result<PipelineReport> {
        let (columns, series) = self.ingest_upload(csv_bytes, pipeline)?;
        Ok(self.forecast_all(columns, series, &pipeline.requests))
    }

    /// Same as [`run_pipeline`](Self::run_pipeline) with ingestion and fits served from `cache`
    pub fn run_pipeline_cached(
        &self,
        cache: &ForecastCache,
        csv_bytes: &[u8],
        pipeline: &PipelineConfig,
    ) -> Result<PipelineReport> {
        let df = DataFrameIngestor::read_csv_bytes(csv_bytes)?;
        let columns = self.resolve_columns(&df, pipeline)?;
        let series = cache.get_or_ingest(
            csv_bytes,
            &columns.date_column,
            &columns.target_column,
            || self.ingestor.ingest(&df, &columns.date_column, &columns.target_column),
        )?;

        let outcomes = pipeline
            .requests
            .iter()
            .map(|request| PipelineOutcome {
                request: request.clone(),
                result: self.run_cached(cache, &series, request),
            })
            .collect();
        Ok(PipelineReport {
            columns,
            series,
            outcomes,
        })
    }

    fn ingest_upload(
        &self,
        csv_bytes: &[u8],
        pipeline: &PipelineConfig,
    ) -> Result<(ColumnSelection, TimeSeries)> {
        let df = DataFrameIngestor::read_csv_bytes(csv_bytes)?;
        let columns = self.resolve_columns(&df, pipeline)?;
        let series = self
            .ingestor
            .ingest(&df, &columns.date_column, &columns.target_column)?;
        Ok((columns, series))
    }

    fn resolve_columns(
        &self,
        df: &polars::prelude::DataFrame,
        pipeline: &PipelineConfig,
    ) -> Result<ColumnSelection> {
        match (&pipeline.date_column, &pipeline.target_column) {
            (Some(date), Some(target)) => Ok(ColumnSelection {
                date_column: date.clone(),
                target_column: target.clone(),
            }),
            (date, target) => {
                let detected = self.ingestor.detect_columns(df)?;
                Ok(ColumnSelection {
                    date_column: date.clone().unwrap_or(detected.date_column),
                    target_column: target.clone().unwrap_or(detected.target_column),
                })
            }
        }
    }

    fn forecast_all(
        &self,
        columns: ColumnSelection,
        series: TimeSeries,
        requests: &[ForecastRequest],
    ) -> PipelineReport {
        let outcomes = requests
            .iter()
            .map(|request| {
                let result = self.run(&series, request);
                if let Err(err) = &result {
                    warn!(strategy = %request.params.kind(), error = %err, "Pipeline request failed");
                }
                PipelineOutcome {
                    request: request.clone(),
                    result,
                }
            })
            .collect();

        PipelineReport {
            columns,
            series,
            outcomes,
        }
    }

    fn budget_for(&self, request: &ForecastRequest, token: Option<&CancellationToken>) -> FitBudget {
        let timeout = request
            .timeout_secs
            .map(Duration::from_secs)
            .or_else(|| self.config.default_timeout());
        let budget = match timeout {
            Some(timeout) => FitBudget::with_timeout(timeout),
            None => FitBudget::unbounded(),
        };
        match token {
            Some(token) => budget.with_token(token.clone()),
            None => budget,
        }
    }

    fn execute(
        &self,
        series: &TimeSeries,
        request: &ForecastRequest,
        token: Option<&CancellationToken>,
    ) -> Result<ForecastResult> {
        validate_horizon(request.horizon)?;
        if series.len() < self.config.min_observations {
            return Err(ForecastError::DataValidation(format!(
                "Series '{}' has {} observations, at least {} are required",
                series.name(),
                series.len(),
                self.config.min_observations
            )));
        }
        if request.timeout_secs == Some(0) {
            return Err(ForecastError::InvalidParameter(
                "timeout_secs must be positive when set".to_string(),
            ));
        }

        let budget = self.budget_for(request, token);
        let strategy = request.params.build();
        debug!(
            strategy = %strategy.kind(),
            observations = series.len(),
            horizon = request.horizon,
            frequency = %series.frequency(),
            "Starting forecast"
        );

        let result = strategy.fit_and_forecast_within(series, request.horizon, &budget)?;
        info!(strategy = %result.strategy(), horizon = result.horizon(), "Forecast ready");
        Ok(result)
    }
}
