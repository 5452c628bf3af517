//! Time series data handling for forecasting
//!
//! [`DataFrameIngestor`] turns an uploaded table into a [`TimeSeries`]:
//! dates are parsed leniently, rows missing a date or a numeric target are
//! dropped, the remainder is sorted and a sampling frequency is inferred.

use crate::config::{DuplicatePolicy, IngestConfig};
use crate::error::{ForecastError, Result};
use crate::frequency::Frequency;
use crate::utils::{parse_datetime, parse_number};
use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Rows read to infer the CSV schema
const SCHEMA_INFERENCE_ROWS: usize = 100;

/// Values sampled when guessing whether a text column holds dates
const DATE_SNIFF_ROWS: usize = 50;

/// Share of sampled values that must parse for a text column to count as dates
const DATE_SNIFF_SHARE: f64 = 0.8;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Ordered, uniquely timestamped observations of one numeric variable
///
/// Immutable once built; every constructor checks that timestamps are
/// strictly increasing and values finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TimeSeriesRecord")]
pub struct TimeSeries {
    name: String,
    timestamps: Vec<NaiveDateTime>,
    values: Vec<f64>,
    frequency: Frequency,
    frequency_inferred: bool,
}

/// Unchecked wire form of a [`TimeSeries`]
#[derive(Deserialize)]
struct TimeSeriesRecord {
    name: String,
    timestamps: Vec<NaiveDateTime>,
    values: Vec<f64>,
    frequency: Frequency,
    frequency_inferred: bool,
}

impl TryFrom<TimeSeriesRecord> for TimeSeries {
    type Error = ForecastError;

    fn try_from(record: TimeSeriesRecord) -> Result<Self> {
        let mut series =
            Self::with_default_frequency(record.timestamps, record.values, record.frequency)?
                .with_name(record.name);
        series.frequency = record.frequency;
        series.frequency_inferred = record.frequency_inferred;
        Ok(series)
    }
}

impl TimeSeries {
    /// Build a series, inferring its frequency or falling back to monthly
    pub fn new(timestamps: Vec<NaiveDateTime>, values: Vec<f64>) -> Result<Self> {
        Self::with_default_frequency(timestamps, values, Frequency::monthly())
    }

    /// Build a series, falling back to `default` when no spacing can be inferred
    pub fn with_default_frequency(
        timestamps: Vec<NaiveDateTime>,
        values: Vec<f64>,
        default: Frequency,
    ) -> Result<Self> {
        if timestamps.len() != values.len() {
            return Err(ForecastError::DataValidation(format!(
                "Timestamps length ({}) doesn't match values length ({})",
                timestamps.len(),
                values.len()
            )));
        }
        if timestamps.is_empty() {
            return Err(ForecastError::DataValidation(
                "A time series needs at least one observation".to_string(),
            ));
        }
        if let Some(pair) = timestamps.windows(2).find(|w| w[1] <= w[0]) {
            return Err(ForecastError::DataValidation(format!(
                "Timestamps must be strictly increasing: {} is followed by {}",
                pair[0], pair[1]
            )));
        }
        if let Some(position) = values.iter().position(|v| !v.is_finite()) {
            return Err(ForecastError::DataValidation(format!(
                "Value at {} is not finite",
                timestamps[position]
            )));
        }

        let (frequency, frequency_inferred) = match Frequency::infer(&timestamps) {
            Some(frequency) => (frequency, true),
            None => (default, false),
        };

        Ok(Self {
            name: "value".to_string(),
            timestamps,
            values,
            frequency,
            frequency_inferred,
        })
    }

    /// Rename the value column
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Override the inferred frequency
    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self.frequency_inferred = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Whether [`Self::frequency`] came from the data rather than a fallback
    pub fn frequency_inferred(&self) -> bool {
        self.frequency_inferred
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamps.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamps.last().copied()
    }

    /// Span between the first and last observation in days
    pub fn span_days(&self) -> f64 {
        match (self.first_timestamp(), self.last_timestamp()) {
            (Some(first), Some(last)) => (last - first).num_seconds() as f64 / 86_400.0,
            _ => 0.0,
        }
    }

    /// `horizon` timestamps following the last observation at the series frequency
    pub fn future_index(&self, horizon: usize) -> Result<Vec<NaiveDateTime>> {
        let last = self.last_timestamp().ok_or_else(|| {
            ForecastError::DataValidation("Cannot extend an empty series".to_string())
        })?;
        self.frequency.future_index(last, horizon)
    }

    /// Render the series as a two-column table (`date`, name)
    ///
    /// Ingesting the result with the same column names yields an equal series.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let dates: Vec<String> = self
            .timestamps
            .iter()
            .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
            .collect();
        let df = DataFrame::new(vec![
            Series::new("date", dates),
            Series::new(&self.name, self.values.clone()),
        ])?;
        Ok(df)
    }
}

/// Columns chosen by [`DataFrameIngestor::detect_columns`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSelection {
    pub date_column: String,
    pub target_column: String,
}

/// Builds [`TimeSeries`] values from raw tables
#[derive(Debug, Clone, Default)]
pub struct DataFrameIngestor {
    config: IngestConfig,
}

impl DataFrameIngestor {
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Read a CSV upload into a DataFrame
    pub fn read_csv_bytes(bytes: &[u8]) -> Result<DataFrame> {
        let df = CsvReader::new(Cursor::new(bytes.to_vec()))
            .infer_schema(Some(SCHEMA_INFERENCE_ROWS))
            .has_header(true)
            .finish()?;
        Ok(df)
    }

    /// Read a CSV file into a DataFrame
    pub fn read_csv_path<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
        let file = File::open(path)?;
        let df = CsvReader::new(file)
            .infer_schema(Some(SCHEMA_INFERENCE_ROWS))
            .has_header(true)
            .finish()?;
        Ok(df)
    }

    /// Ingest a CSV upload
    pub fn ingest_csv_bytes(
        &self,
        bytes: &[u8],
        date_column: &str,
        target_column: &str,
    ) -> Result<TimeSeries> {
        let df = Self::read_csv_bytes(bytes)?;
        self.ingest(&df, date_column, target_column)
    }

    /// Ingest a CSV file
    pub fn ingest_csv_path<P: AsRef<Path>>(
        &self,
        path: P,
        date_column: &str,
        target_column: &str,
    ) -> Result<TimeSeries> {
        let df = Self::read_csv_path(path)?;
        self.ingest(&df, date_column, target_column)
    }

    /// Clean `df` into a series of `target_column` indexed by `date_column`
    pub fn ingest(
        &self,
        df: &DataFrame,
        date_column: &str,
        target_column: &str,
    ) -> Result<TimeSeries> {
        let dates = self.parse_dates(column(df, date_column)?)?;
        let targets = parse_targets(column(df, target_column)?)?;

        if df.height() > 0 && dates.iter().all(Option::is_none) {
            return Err(ForecastError::DataValidation(format!(
                "Column '{date_column}' contains no parseable dates"
            )));
        }
        if df.height() > 0 && targets.iter().all(Option::is_none) {
            return Err(ForecastError::DataValidation(format!(
                "Column '{target_column}' contains no numeric values"
            )));
        }

        let mut rows: Vec<(NaiveDateTime, f64)> = dates
            .into_iter()
            .zip(targets)
            .filter_map(|(date, value)| Some((date?, value?)))
            .collect();
        let dropped = df.height() - rows.len();

        if rows.is_empty() {
            return Err(ForecastError::DataValidation(format!(
                "No rows with both '{date_column}' and '{target_column}' remain after cleaning"
            )));
        }

        rows.sort_by_key(|(date, _)| *date);
        let rows = resolve_duplicates(rows, self.config.duplicates)?;
        let (timestamps, values): (Vec<_>, Vec<_>) = rows.into_iter().unzip();

        let series =
            TimeSeries::with_default_frequency(timestamps, values, self.config.default_frequency)?
                .with_name(target_column);

        debug!(
            rows = series.len(),
            dropped,
            frequency = %series.frequency(),
            inferred = series.frequency_inferred(),
            "ingested series"
        );
        Ok(series)
    }

    /// Guess the date and target columns of an unlabelled table
    ///
    /// The date column is the first whose name mentions a date or time (or
    /// is exactly `ds`), else the first temporal column, else the first text
    /// column whose values mostly parse as dates. The target is the first
    /// numeric column that is not the date column.
    pub fn detect_columns(&self, df: &DataFrame) -> Result<ColumnSelection> {
        let date_column = self.detect_date_column(df)?;
        let target_column = df
            .get_columns()
            .iter()
            .find(|s| s.name() != date_column && s.dtype().is_numeric())
            .map(|s| s.name().to_string())
            .ok_or_else(|| {
                ForecastError::DataValidation("No numeric target column found in data".to_string())
            })?;

        Ok(ColumnSelection {
            date_column,
            target_column,
        })
    }

    fn detect_date_column(&self, df: &DataFrame) -> Result<String> {
        for name in df.get_column_names() {
            let lower = name.to_lowercase();
            if lower.contains("date")
                || lower.contains("time")
                || lower.contains("timestamp")
                || lower == "ds"
            {
                return Ok(name.to_string());
            }
        }

        if let Some(series) = df.get_columns().iter().find(|s| s.dtype().is_temporal()) {
            return Ok(series.name().to_string());
        }

        for series in df.get_columns() {
            if matches!(series.dtype(), DataType::Utf8) && self.looks_like_dates(series)? {
                return Ok(series.name().to_string());
            }
        }

        Err(ForecastError::DataValidation(
            "No date column found in data".to_string(),
        ))
    }

    fn looks_like_dates(&self, series: &Series) -> Result<bool> {
        let text = series.utf8()?;
        let sample: Vec<&str> = text.into_iter().flatten().take(DATE_SNIFF_ROWS).collect();
        if sample.is_empty() {
            return Ok(false);
        }
        let parsed = sample
            .iter()
            .filter(|v| parse_datetime(v, self.config.day_first).is_some())
            .count();
        Ok(parsed as f64 / sample.len() as f64 >= DATE_SNIFF_SHARE)
    }

    fn parse_dates(&self, series: &Series) -> Result<Vec<Option<NaiveDateTime>>> {
        let text = series.cast(&DataType::Utf8)?;
        let parsed = text
            .utf8()?
            .into_iter()
            .map(|v| v.and_then(|v| parse_datetime(v, self.config.day_first)))
            .collect();
        Ok(parsed)
    }
}

fn column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Series> {
    if !df.get_column_names().contains(&name) {
        return Err(ForecastError::DataValidation(format!(
            "Column '{name}' not found; available columns: {}",
            df.get_column_names().join(", ")
        )));
    }
    Ok(df.column(name)?)
}

fn parse_targets(series: &Series) -> Result<Vec<Option<f64>>> {
    if series.dtype().is_numeric() {
        let numeric = series.cast(&DataType::Float64)?;
        let parsed = numeric
            .f64()?
            .into_iter()
            .map(|v| v.filter(|v| v.is_finite()))
            .collect();
        Ok(parsed)
    } else {
        let text = series.cast(&DataType::Utf8)?;
        let parsed = text
            .utf8()?
            .into_iter()
            .map(|v| v.and_then(parse_number))
            .collect();
        Ok(parsed)
    }
}

fn resolve_duplicates(
    rows: Vec<(NaiveDateTime, f64)>,
    policy: DuplicatePolicy,
) -> Result<Vec<(NaiveDateTime, f64)>> {
    let mut resolved: Vec<(NaiveDateTime, f64)> = Vec::with_capacity(rows.len());
    // running count of rows merged into the last entry, for the mean policy
    let mut merged = 1usize;

    for (date, value) in rows {
        match resolved.last_mut() {
            Some(last) if last.0 == date => match policy {
                DuplicatePolicy::Reject => {
                    return Err(ForecastError::DataValidation(format!(
                        "Duplicate timestamp {date}"
                    )));
                }
                DuplicatePolicy::KeepLast => last.1 = value,
                DuplicatePolicy::Mean => {
                    merged += 1;
                    last.1 += (value - last.1) / merged as f64;
                }
            },
            _ => {
                resolved.push((date, value));
                merged = 1;
            }
        }
    }
    Ok(resolved)
}
