//! Numerical comparison helpers with numpy `allclose` semantics.

use crate::error::TesselError;
use crate::Result;

/// `|a - b| <= atol + rtol * |b|` for every pair; lengths must match.
pub fn allclose(a: &[f64], b: &[f64], rtol: f64, atol: f64) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(&x, &y)| (x - y).abs() <= atol + rtol * y.abs())
}

/// Largest absolute elementwise difference (infinite on length mismatch).
pub fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return f64::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (x - y).abs())
        .fold(0.0, f64::max)
}

/// Fail with `ToleranceExceeded` unless `actual` is close to `expected`.
pub fn ensure_close(what: &str, actual: &[f64], expected: &[f64], rtol: f64, atol: f64) -> Result<()> {
    if allclose(actual, expected, rtol, atol) {
        return Ok(());
    }
    let scale = expected.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    Err(TesselError::ToleranceExceeded {
        what: what.to_string(),
        max_err: max_abs_diff(actual, expected),
        tol: atol + rtol * scale,
    })
}
