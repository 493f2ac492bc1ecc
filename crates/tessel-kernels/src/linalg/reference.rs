//! Dense reference routines used to validate tile results.
//!
//! Row-major f64 slices in and out, computed with `faer`: `llt` for the
//! Cholesky factor, an LU with partial pivoting for solves, and faer's
//! matrix product for reconstruction checks.

use faer::linalg::cholesky::llt::factor::LltError;
use faer::linalg::solvers::Solve;
use faer::{Mat, MatRef, Side};
use tessel_core::{Result, TesselError};

fn check_len(what: &str, data: &[f64], rows: usize, cols: usize) -> Result<()> {
    if data.len() != rows * cols {
        return Err(TesselError::InvalidArgument(format!(
            "{what}: expected {rows}x{cols} = {} values, got {}",
            rows * cols,
            data.len()
        )));
    }
    Ok(())
}

fn to_mat(data: &[f64], rows: usize, cols: usize) -> Mat<f64> {
    Mat::from_fn(rows, cols, |i, j| data[i * cols + j])
}

fn to_row_major(m: MatRef<'_, f64>) -> Vec<f64> {
    let (rows, cols) = (m.nrows(), m.ncols());
    (0..rows * cols).map(|idx| m[(idx / cols, idx % cols)]).collect()
}

/// Lower Cholesky factor of the `n×n` matrix `a`.
pub fn cholesky(a: &[f64], n: usize) -> Result<Vec<f64>> {
    check_len("cholesky", a, n, n)?;
    let llt = to_mat(a, n, n).llt(Side::Lower).map_err(|e| match e {
        LltError::NonPositivePivot { index } => TesselError::NotPositiveDefinite { pivot: index },
    })?;
    Ok(to_row_major(llt.L()))
}

/// Solve `a·y = b` for the `n×nrhs` right-hand side `b`.
pub fn solve(a: &[f64], n: usize, b: &[f64], nrhs: usize) -> Result<Vec<f64>> {
    check_len("solve lhs", a, n, n)?;
    check_len("solve rhs", b, n, nrhs)?;
    let lu = to_mat(a, n, n).partial_piv_lu();
    let y = lu.solve(to_mat(b, n, nrhs));
    let y = to_row_major(y.as_ref());
    if y.iter().any(|v| !v.is_finite()) {
        return Err(TesselError::InvalidArgument("solve: matrix is singular".into()));
    }
    Ok(y)
}

/// `a (m×k) · b (k×n)`.
pub fn matmul(a: &[f64], b: &[f64], m: usize, k: usize, n: usize) -> Result<Vec<f64>> {
    check_len("matmul lhs", a, m, k)?;
    check_len("matmul rhs", b, k, n)?;
    let product = &to_mat(a, m, k) * &to_mat(b, k, n);
    Ok(to_row_major(product.as_ref()))
}

/// Transpose of the `rows×cols` matrix `a`.
pub fn transpose(a: &[f64], rows: usize, cols: usize) -> Result<Vec<f64>> {
    check_len("transpose", a, rows, cols)?;
    Ok(to_row_major(to_mat(a, rows, cols).transpose()))
}
