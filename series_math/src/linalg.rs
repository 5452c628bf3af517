//! Dense linear solvers for small regression problems
//!
//! Design matrices in this workspace are row-major `&[Vec<f64>]` with a few
//! dozen columns at most. They are copied into `nalgebra` matrices and the
//! normal equations are solved by Cholesky, falling back to SVD when the
//! Gram matrix is not numerically positive definite.

use crate::{MathError, Result};
use nalgebra::{DMatrix, DVector};

/// Relative pivot size below which a system is treated as singular
const SINGULAR_TOLERANCE: f64 = 1e-13;

/// Jitter added to the diagonal of `X'X` by [`least_squares`]
const DIAGONAL_JITTER: f64 = 1e-9;

fn finite_solution(solution: DVector<f64>) -> Result<Vec<f64>> {
    if solution.iter().any(|v| !v.is_finite()) {
        return Err(MathError::CalculationError(
            "Solution contains non-finite values".to_string(),
        ));
    }
    Ok(solution.as_slice().to_vec())
}

/// Solve `a * x = b` by LU decomposition with partial pivoting
pub fn solve_linear_system(a: Vec<Vec<f64>>, b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    if a.len() != n || a.iter().any(|row| row.len() != n) {
        return Err(MathError::InvalidInput(format!(
            "Expected a {n}x{n} system matrix"
        )));
    }
    if n == 0 {
        return Ok(Vec::new());
    }

    let matrix = DMatrix::from_fn(n, n, |r, c| a[r][c]);
    let scale = matrix.diagonal().amax().max(1.0);
    let lu = matrix.lu();
    let u = lu.u();
    if let Some(col) = (0..n).find(|&i| u[(i, i)].abs() < SINGULAR_TOLERANCE * scale) {
        return Err(MathError::CalculationError(format!(
            "Matrix is singular at column {col}"
        )));
    }

    let solution = lu
        .solve(&DVector::from_vec(b))
        .ok_or_else(|| MathError::CalculationError("Matrix is singular".to_string()))?;
    finite_solution(solution)
}

/// Minimise `||y - X beta||^2 + sum_j penalties[j] * beta_j^2`
///
/// A zero penalty leaves the coefficient unregularised.
pub fn penalized_least_squares(x: &[Vec<f64>], y: &[f64], penalties: &[f64]) -> Result<Vec<f64>> {
    if x.len() != y.len() {
        return Err(MathError::InvalidInput(format!(
            "Design matrix has {} rows but target has {} values",
            x.len(),
            y.len()
        )));
    }
    if x.is_empty() {
        return Err(MathError::InsufficientData(
            "Cannot fit a regression without observations".to_string(),
        ));
    }
    let p = penalties.len();
    if x.iter().any(|row| row.len() != p) {
        return Err(MathError::InvalidInput(format!(
            "Every design row must have {p} columns"
        )));
    }
    if p == 0 {
        return Ok(Vec::new());
    }

    let design = DMatrix::from_fn(x.len(), p, |r, c| x[r][c]);
    let target = DVector::from_column_slice(y);
    let design_t = design.transpose();
    let gram = &design_t * &design + DMatrix::from_diagonal(&DVector::from_column_slice(penalties));
    let rhs = design_t * target;

    let solution = match gram.clone().cholesky() {
        Some(cholesky) => cholesky.solve(&rhs),
        None => gram
            .svd(true, true)
            .solve(&rhs, SINGULAR_TOLERANCE)
            .map_err(|e| MathError::CalculationError(format!("SVD solve failed: {e}")))?,
    };
    finite_solution(solution)
}

/// Ordinary least squares with a tiny diagonal jitter for near-collinear designs
pub fn least_squares(x: &[Vec<f64>], y: &[f64]) -> Result<Vec<f64>> {
    let p = x.first().map(Vec::len).unwrap_or(0);
    let mean_square = if x.is_empty() || p == 0 {
        0.0
    } else {
        x.iter().flatten().map(|v| v * v).sum::<f64>() / (x.len() * p) as f64
    };
    let jitter = DIAGONAL_JITTER * mean_square.max(1e-3) * x.len() as f64;
    penalized_least_squares(x, y, &vec![jitter; p])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_small_system() {
        let a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let b = vec![3.0, 5.0];
        let x = solve_linear_system(a, b).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_singular_system_is_rejected() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        let result = solve_linear_system(a, vec![1.0, 2.0]);
        assert!(matches!(result, Err(MathError::CalculationError(_))));
    }

    #[test]
    fn test_least_squares_recovers_line() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![1.0, i as f64]).collect();
        let y: Vec<f64> = (0..20).map(|i| 3.0 + 0.5 * i as f64).collect();
        let beta = least_squares(&x, &y).unwrap();
        assert!((beta[0] - 3.0).abs() < 1e-6);
        assert!((beta[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_collinear_columns_stay_finite() {
        let x: Vec<Vec<f64>> = (0..10).map(|_| vec![2.0, 2.0]).collect();
        let y = vec![2.0; 10];
        let beta = least_squares(&x, &y).unwrap();
        assert!(beta.iter().all(|b| b.is_finite()));
        assert!((2.0 * beta[0] + 2.0 * beta[1] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_penalty_shrinks_coefficient() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..10).map(|i| 2.0 * i as f64).collect();
        let free = penalized_least_squares(&x, &y, &[0.0]).unwrap();
        let shrunk = penalized_least_squares(&x, &y, &[1000.0]).unwrap();
        assert!((free[0] - 2.0).abs() < 1e-9);
        assert!(shrunk[0] < free[0]);
    }

    #[test]
    fn test_indefinite_gram_falls_back_to_svd() {
        // a negative penalty makes X'X + D indefinite, so Cholesky refuses it
        let x: Vec<Vec<f64>> = (0..4).map(|i| vec![1.0, i as f64]).collect();
        let y: Vec<f64> = (0..4).map(|i| 1.0 + i as f64).collect();
        let beta = penalized_least_squares(&x, &y, &[-8.0, 0.0]).unwrap();

        // (X'X + D) beta = X'y with X'X = [[4, 6], [6, 14]] and X'y = [10, 20]
        let residual_0 = -4.0 * beta[0] + 6.0 * beta[1] - 10.0;
        let residual_1 = 6.0 * beta[0] + 14.0 * beta[1] - 20.0;
        assert!(residual_0.abs() < 1e-9, "{beta:?}");
        assert!(residual_1.abs() < 1e-9, "{beta:?}");
    }

    #[test]
    fn test_empty_penalties_give_empty_solution() {
        let x = vec![Vec::new(); 3];
        let beta = penalized_least_squares(&x, &[1.0, 2.0, 3.0], &[]).unwrap();
        assert!(beta.is_empty());
    }
}
