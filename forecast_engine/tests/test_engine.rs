use forecast_engine::models::{ArimaParams, LaggedGbmParams, ProphetParams};
use forecast_engine::{
    plot_frame, EngineConfig, ErrorKind, ForecastCache, ForecastEngine, ForecastError,
    ForecastRequest, PipelineConfig, StrategyKind, StrategyParams,
};
use pretty_assertions::assert_eq;
use std::io::Write;
use tempfile::NamedTempFile;

// 36 monthly rows written day-first, newest first
fn monthly_upload() -> Vec<u8> {
    let mut csv = String::from("Month,Revenue\n");
    for i in (0..36).rev() {
        let year = 2020 + i / 12;
        let month = i % 12 + 1;
        let value = 100.0 + 2.0 * i as f64 + 3.0 * (i as f64).sin();
        csv.push_str(&format!("01/{month:02}/{year},{value:.3}\n"));
    }
    csv.into_bytes()
}

fn arima_request(horizon: usize) -> ForecastRequest {
    ForecastRequest::new(horizon, StrategyParams::Arima(ArimaParams::new(1, 1, 1)))
}

#[test]
fn test_two_rows_fail_before_any_fit() {
    let engine = ForecastEngine::default();
    let pipeline = PipelineConfig {
        requests: vec![arima_request(3)],
        ..PipelineConfig::default()
    };
    let report = engine
        .run_pipeline(b"date,value\n2023-01-01,1\n2023-02-01,\n2023-03-01,3\n", &pipeline)
        .unwrap();
    assert_eq!(report.series.len(), 2);

    let err = report.outcomes[0].result.as_ref().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataValidation);
}

#[test]
fn test_zero_horizon_is_a_forecast_error() {
    let engine = ForecastEngine::default();
    let series = engine
        .ingestor()
        .ingest_csv_bytes(&monthly_upload(), "Month", "Revenue")
        .unwrap();
    let err = engine.run(&series, &arima_request(0)).unwrap_err();
    assert!(matches!(err, ForecastError::Forecasting(_)));
    assert_eq!(err.kind(), ErrorKind::Forecast);
}

#[test]
fn test_pipeline_failures_are_isolated() {
    let engine = ForecastEngine::default();
    let pipeline = PipelineConfig {
        date_column: None,
        target_column: None,
        requests: vec![
            arima_request(6),
            ForecastRequest::new(6, StrategyParams::LaggedGbm(LaggedGbmParams::new(100))),
            ForecastRequest::new(6, StrategyParams::Prophet(ProphetParams::default())),
        ],
    };

    let report = engine.run_pipeline(&monthly_upload(), &pipeline).unwrap();
    assert_eq!(report.columns.date_column, "Month");
    assert_eq!(report.columns.target_column, "Revenue");
    assert_eq!(report.series.len(), 36);

    assert_eq!(report.outcomes.len(), 3);
    assert!(report.outcomes[0].is_ok());
    assert!(report.outcomes[2].is_ok());
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0].1,
        ForecastError::ModelFit {
            strategy: StrategyKind::LaggedGbm,
            ..
        }
    ));
    assert_eq!(report.successes().count(), 2);
}

#[test]
fn test_cached_pipeline_reuses_results_until_invalidated() {
    let engine = ForecastEngine::default();
    let cache = ForecastCache::new();
    let upload = monthly_upload();
    let pipeline = PipelineConfig {
        date_column: Some("Month".to_string()),
        target_column: Some("Revenue".to_string()),
        requests: vec![arima_request(6)],
    };

    let first = engine.run_pipeline_cached(&cache, &upload, &pipeline).unwrap();
    let second = engine.run_pipeline_cached(&cache, &upload, &pipeline).unwrap();
    assert_eq!(
        first.outcomes[0].result.as_ref().unwrap(),
        second.outcomes[0].result.as_ref().unwrap()
    );
    let stats = cache.stats();
    assert_eq!((stats.series_hits, stats.series_misses), (1, 1));
    assert_eq!((stats.forecast_hits, stats.forecast_misses), (1, 1));

    assert_eq!(cache.invalidate_series(&first.series), 2);
    engine.run_pipeline_cached(&cache, &upload, &pipeline).unwrap();
    let stats = cache.stats();
    assert_eq!((stats.series_misses, stats.forecast_misses), (2, 2));
}

#[test]
fn test_requests_round_trip_through_json() {
    let json = r#"{
        "date_column": "Month",
        "requests": [
            {"horizon": 6, "params": {"strategy": "arima", "p": 1, "d": 1, "q": 1}},
            {"horizon": 3, "params": {"strategy": "lstm", "lookback": 4, "epochs": 2}, "timeout_secs": 60}
        ]
    }"#;
    let pipeline: PipelineConfig = serde_json::from_str(json).unwrap();
    assert_eq!(pipeline.target_column, None);
    assert_eq!(pipeline.requests[0], arima_request(6));
    assert_eq!(pipeline.requests[1].params.kind(), StrategyKind::Lstm);
    assert_eq!(pipeline.requests[1].timeout_secs, Some(60));
}

#[test]
fn test_config_file_and_plot_frame() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"{{"min_observations": 40, "ingest": {{"default_frequency": "MS"}}}}"#
    )
    .unwrap();
    let engine = ForecastEngine::new(EngineConfig::from_json_file(file.path()).unwrap()).unwrap();

    let series = engine
        .ingestor()
        .ingest_csv_bytes(&monthly_upload(), "Month", "Revenue")
        .unwrap();
    let err = engine.run(&series, &arima_request(2)).unwrap_err();
    assert!(matches!(err, ForecastError::DataValidation(_)));

    let result = ForecastEngine::default().run(&series, &arima_request(2)).unwrap();
    let frame = plot_frame(&series, &result).unwrap();
    assert_eq!(frame.height(), 38);
}
