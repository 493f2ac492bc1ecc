//! Factorizations and solves on single tiles.
//!
//! Only the lower triangle of the input is read; the strict upper triangle
//! of a factor is zero.

use tessel_core::{Result, TesselError, Tile};

fn require_square(t: &Tile) -> Result<usize> {
    if t.rows() != t.cols() {
        return Err(TesselError::ShapeMismatch {
            expected: vec![t.rows(), t.rows()],
            got: vec![t.rows(), t.cols()],
        });
    }
    Ok(t.rows())
}

/// Lower-triangular `L` with `a = L·Lᵗ`, computed column by column.
pub fn cholesky(a: &Tile) -> Result<Tile> {
    let n = require_square(a)?;
    let mut l = vec![0.0f64; n * n];
    for j in 0..n {
        let mut d = a.get(j, j);
        for k in 0..j {
            d -= l[j * n + k] * l[j * n + k];
        }
        if d <= 0.0 || !d.is_finite() {
            return Err(TesselError::NotPositiveDefinite { pivot: j });
        }
        let d = d.sqrt();
        l[j * n + j] = d;
        for i in j + 1..n {
            let mut s = a.get(i, j);
            for k in 0..j {
                s -= l[i * n + k] * l[j * n + k];
            }
            l[i * n + j] = s / d;
        }
    }
    Tile::new(n, n, &l)
}

/// Solve `L·Lᵗ·y = x` for every column of `x` given the factor `l`.
pub fn cholesky_solve(l: &Tile, x: &Tile) -> Result<Tile> {
    let n = require_square(l)?;
    if x.rows() != n {
        return Err(TesselError::ShapeMismatch {
            expected: vec![n, x.cols()],
            got: vec![x.rows(), x.cols()],
        });
    }
    let nrhs = x.cols();
    let mut y = x.as_slice().to_vec();
    for c in 0..nrhs {
        // L·z = x
        for i in 0..n {
            let mut s = y[i * nrhs + c];
            for k in 0..i {
                s -= l.get(i, k) * y[k * nrhs + c];
            }
            y[i * nrhs + c] = s / l.get(i, i);
        }
        // Lᵗ·y = z
        for i in (0..n).rev() {
            let mut s = y[i * nrhs + c];
            for k in i + 1..n {
                s -= l.get(k, i) * y[k * nrhs + c];
            }
            y[i * nrhs + c] = s / l.get(i, i);
        }
    }
    Tile::new(n, nrhs, &y)
}
