//! # Series Math
//!
//! Numeric building blocks shared by the forecasting strategies.
//! This crate provides small dense linear solvers, min-max scaling and
//! the differencing/statistics helpers used when fitting time series models.

use thiserror::Error;

pub mod linalg;
pub mod scaling;
pub mod stats;

pub use crate::linalg::{penalized_least_squares, solve_linear_system};
pub use crate::scaling::MinMaxScaler;

/// Errors that can occur in numeric routines
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// Result type for numeric operations
pub type Result<T> = std::result::Result<T, MathError>;
