//! Error types for the forecast_engine crate

use crate::models::StrategyKind;
use polars::prelude::PolarsError;
use serde::Serialize;
use thiserror::Error;

/// Custom error types for the forecast_engine crate
#[derive(Debug, Error)]
pub enum ForecastError {
    /// No usable rows after cleaning, unparseable or missing columns
    #[error("Data validation error: {0}")]
    DataValidation(String),

    /// A strategy could not fit its model to the series
    #[error("Model fit error ({strategy}): {reason}")]
    ModelFit {
        strategy: StrategyKind,
        reason: String,
    },

    /// Invalid horizon or a rollout that produced unusable values
    #[error("Forecasting error: {0}")]
    Forecasting(String),

    /// A fit exceeded its deadline or was cancelled by the caller
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// Error from invalid parameters
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error while loading or validating configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from IO operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from Polars operations
    #[error("Polars error: {0}")]
    PolarsError(String),

    /// Error while encoding results
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Error from the numeric routines
    #[error("Math error: {0}")]
    MathError(#[from] series_math::MathError),
}

/// Coarse classification of a [`ForecastError`] for user-facing surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DataValidation,
    ModelFit,
    Forecast,
    Interrupted,
    Config,
    Io,
}

impl ForecastError {
    /// Shorthand for a [`ForecastError::ModelFit`]
    pub fn model_fit(strategy: StrategyKind, reason: impl Into<String>) -> Self {
        ForecastError::ModelFit {
            strategy,
            reason: reason.into(),
        }
    }

    /// Which part of the taxonomy this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            ForecastError::DataValidation(_) | ForecastError::PolarsError(_) => {
                ErrorKind::DataValidation
            }
            ForecastError::ModelFit { .. } | ForecastError::MathError(_) => ErrorKind::ModelFit,
            ForecastError::Forecasting(_) | ForecastError::InvalidParameter(_) => {
                ErrorKind::Forecast
            }
            ForecastError::Interrupted(_) => ErrorKind::Interrupted,
            ForecastError::Config(_) => ErrorKind::Config,
            ForecastError::IoError(_) | ForecastError::SerializationError(_) => ErrorKind::Io,
        }
    }
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, ForecastError>;

impl From<PolarsError> for ForecastError {
    fn from(err: PolarsError) -> Self {
        ForecastError::PolarsError(err.to_string())
    }
}

impl From<serde_json::Error> for ForecastError {
    fn from(err: serde_json::Error) -> Self {
        ForecastError::SerializationError(err.to_string())
    }
}

impl From<csv::Error> for ForecastError {
    fn from(err: csv::Error) -> Self {
        ForecastError::SerializationError(err.to_string())
    }
}
