//! # AstralytiQ
//!
//! `astralytiq` bundles the forecasting workspace behind one dependency:
//! [`forecast_engine`] for ingestion, strategies and output, and
//! [`series_math`] for the numeric building blocks.
//!
//! ## Example
//!
//! ```
//! use astralytiq::prelude::*;
//!
//! let csv = b"date,value\n01/01/2024,10\n01/02/2024,12\n01/03/2024,13\n01/04/2024,15\n01/05/2024,16\n";
//! let engine = ForecastEngine::default();
//! let series = engine.ingestor().ingest_csv_bytes(csv, "date", "value").unwrap();
//! assert_eq!(series.len(), 5);
//!
//! let request = ForecastRequest::new(2, StrategyParams::Arima(ArimaParams::new(1, 0, 0)));
//! let result = engine.run(&series, &request).unwrap();
//! assert_eq!(result.horizon(), 2);
//! ```

pub use forecast_engine;
pub use series_math;

/// The types most callers need
pub mod prelude {
    pub use forecast_engine::models::{
        ArimaParams, Holiday, LagRollout, LaggedGbmParams, LstmParams, ProphetParams, Toggle,
    };
    pub use forecast_engine::{
        plot_frame, CancellationToken, DataFrameIngestor, EngineConfig, ForecastCache,
        ForecastEngine, ForecastError, ForecastPoint, ForecastRequest, ForecastResult,
        ForecastStrategy, Frequency, PipelineConfig, StrategyKind, StrategyParams, TimeSeries,
    };
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_runs_a_forecast() {
        let engine = ForecastEngine::default();
        let series = engine
            .ingestor()
            .ingest_csv_bytes(b"ds,y\n2024-01-01,1\n2024-01-02,2\n2024-01-03,4\n2024-01-04,5\n", "ds", "y")
            .unwrap();
        assert_eq!(series.frequency(), Frequency::daily());

        let request = ForecastRequest::new(3, StrategyParams::Arima(ArimaParams::new(1, 0, 0)));
        let result = engine.run(&series, &request).unwrap();
        assert_eq!(result.strategy(), StrategyKind::Arima);
        assert_eq!(result.index().len(), 3);
    }
}
