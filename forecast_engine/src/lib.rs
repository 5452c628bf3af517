//! # Forecast Engine
//!
//! A Rust library for forecasting univariate time series uploaded as tables.
//!
//! ## Features
//!
//! - Lenient CSV / DataFrame ingestion with day-first date parsing
//! - Sampling frequency inference (fixed spacing, calendar months, business days)
//! - Forecasting strategies (ARIMA, Prophet-style additive model, LSTM, lagged gradient boosting)
//! - Confidence bounds where the model supports them
//! - Deadlines and cancellation for long fits, parallel batch runs
//! - Content-addressed caching of series and forecasts
//!
//! ## Strategies
//!
//! Every strategy implements [`ForecastStrategy`] and is selected through the
//! serde-tagged [`StrategyParams`]:
//!
//! ```rust,ignore
//! pub enum StrategyParams {
//!     Arima(ArimaParams),
//!     Prophet(ProphetParams),
//!     Lstm(LstmParams),
//!     LaggedGbm(LaggedGbmParams),
//! }
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use forecast_engine::engine::{ForecastEngine, ForecastRequest, StrategyParams};
//! use forecast_engine::models::ArimaParams;
//!
//! # fn main() -> forecast_engine::Result<()> {
//! let engine = ForecastEngine::default();
//!
//! // Load data
//! let series = engine
//!     .ingestor()
//!     .ingest_csv_path("sales.csv", "Date", "Sales")?;
//!
//! // Forecast six periods with ARIMA(1,1,1)
//! let request = ForecastRequest::new(6, StrategyParams::Arima(ArimaParams::new(1, 1, 1)));
//! let result = engine.run(&series, &request)?;
//!
//! for point in result.points() {
//!     println!("{} {:.2}", point.timestamp, point.value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod budget;
pub mod cache;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod frequency;
pub mod metrics;
pub mod models;
pub mod presenter;
pub mod utils;

// Re-export commonly used types
pub use crate::budget::{CancellationToken, FitBudget};
pub use crate::cache::ForecastCache;
pub use crate::config::{DuplicatePolicy, EngineConfig, IngestConfig};
pub use crate::data::{ColumnSelection, DataFrameIngestor, TimeSeries};
pub use crate::engine::{
    ForecastEngine, ForecastRequest, PipelineConfig, PipelineReport, StrategyParams,
};
pub use crate::error::{ErrorKind, ForecastError, Result};
pub use crate::frequency::{Frequency, MonthAnchor};
pub use crate::metrics::{forecast_accuracy, ForecastAccuracy};
pub use crate::models::{
    ConfidenceBounds, FitDiagnostics, ForecastResult, ForecastStrategy, StrategyKind,
};
pub use crate::presenter::{plot_frame, ForecastPoint};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
