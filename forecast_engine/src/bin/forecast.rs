//! # forecast
//!
//! Command-line front end: reads a CSV, runs one strategy and prints the
//! forecast as JSON or CSV.

use clap::{Parser, ValueEnum};
use forecast_engine::engine::{ForecastEngine, ForecastRequest, PipelineConfig, StrategyParams};
use forecast_engine::models::{ArimaParams, LaggedGbmParams, LstmParams, StrategyKind};
use forecast_engine::{EngineConfig, ForecastError, Frequency, Result};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    Arima,
    Prophet,
    Lstm,
    LaggedGbm,
}

impl From<Strategy> for StrategyKind {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Arima => StrategyKind::Arima,
            Strategy::Prophet => StrategyKind::Prophet,
            Strategy::Lstm => StrategyKind::Lstm,
            Strategy::LaggedGbm => StrategyKind::LaggedGbm,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Parser, Debug)]
#[command(name = "forecast")]
#[command(about = "Forecast a time series from a CSV file", long_about = None)]
struct Cli {
    /// Input CSV file with a header row
    #[arg(short, long)]
    input: PathBuf,

    /// Strategy to run
    #[arg(short, long, value_enum, default_value = "arima")]
    strategy: Strategy,

    /// Number of periods to forecast
    #[arg(long, default_value = "6")]
    horizon: usize,

    /// Date column (default: inferred)
    #[arg(long)]
    date_column: Option<String>,

    /// Target column (default: first numeric column)
    #[arg(long)]
    target_column: Option<String>,

    /// ARIMA order as p,d,q
    #[arg(long, value_parser = parse_order)]
    order: Option<(usize, usize, usize)>,

    /// LSTM window length
    #[arg(long)]
    lookback: Option<usize>,

    /// LSTM training epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Lag features for LaggedGBM
    #[arg(long)]
    lags: Option<usize>,

    /// Full strategy parameters as JSON, overriding the individual flags
    #[arg(long)]
    params: Option<String>,

    /// Engine configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Forecast spacing when it cannot be inferred, e.g. D, W, MS
    #[arg(long)]
    default_frequency: Option<Frequency>,

    /// Give up fitting after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn parse_order(text: &str) -> std::result::Result<(usize, usize, usize), String> {
    let parts: Vec<usize> = text
        .split(',')
        .map(|part| part.trim().parse::<usize>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| format!("invalid order '{text}': {e}"))?;
    match parts.as_slice() {
        [p, d, q] => Ok((*p, *d, *q)),
        _ => Err(format!("order must be p,d,q, got '{text}'")),
    }
}

fn strategy_params(cli: &Cli) -> Result<StrategyParams> {
    if let Some(json) = &cli.params {
        let params: StrategyParams = serde_json::from_str(json)?;
        return Ok(params);
    }

    let params = match StrategyKind::from(cli.strategy) {
        StrategyKind::Arima => {
            let (p, d, q) = cli.order.unwrap_or((1, 1, 1));
            StrategyParams::Arima(ArimaParams::new(p, d, q))
        }
        StrategyKind::Lstm => {
            let defaults = LstmParams::default();
            StrategyParams::Lstm(LstmParams::new(
                cli.lookback.unwrap_or(defaults.lookback),
                cli.epochs.unwrap_or(defaults.epochs),
            ))
        }
        StrategyKind::LaggedGbm => StrategyParams::LaggedGbm(match cli.lags {
            Some(lags) => LaggedGbmParams::new(lags),
            None => LaggedGbmParams::default(),
        }),
        kind @ StrategyKind::Prophet => StrategyParams::defaults_for(kind),
    };
    Ok(params)
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(frequency) = cli.default_frequency {
        config.ingest.default_frequency = frequency;
    }
    let engine = ForecastEngine::new(config)?;

    let mut request = ForecastRequest::new(cli.horizon, strategy_params(cli)?);
    request.timeout_secs = cli.timeout_secs;
    let pipeline = PipelineConfig {
        date_column: cli.date_column.clone(),
        target_column: cli.target_column.clone(),
        requests: vec![request],
    };

    let bytes = std::fs::read(&cli.input)?;
    let report = engine.run_pipeline(&bytes, &pipeline)?;
    tracing::info!(
        date_column = %report.columns.date_column,
        target_column = %report.columns.target_column,
        observations = report.series.len(),
        frequency = %report.series.frequency(),
        "Ingested input"
    );

    let result = report
        .outcomes
        .into_iter()
        .next()
        .ok_or_else(|| ForecastError::Forecasting("No forecast was produced".to_string()))?
        .result?;

    match (cli.format, &cli.output) {
        (OutputFormat::Json, Some(path)) => std::fs::write(path, result.to_json()?)?,
        (OutputFormat::Json, None) => println!("{}", result.to_json()?),
        (OutputFormat::Csv, Some(path)) => result.write_csv(BufWriter::new(File::create(path)?))?,
        (OutputFormat::Csv, None) => result.write_csv(io::stdout().lock())?,
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error ({:?}): {err}", err.kind());
            ExitCode::FAILURE
        }
    }
}
