//! Single-tile Cholesky factor-and-solve, validated against the dense
//! reference.

use std::fmt::Write as _;
use std::sync::Arc;

use tessel_core::compare::ensure_close;
use tessel_core::{Array, DType, Result, TesselError};

use crate::context::DeviceContext;
use crate::kernel::Kernel;
use crate::launch::launch;
use crate::params::ParamType;

use super::{reference, tile};

/// Largest supported tile edge.
pub const MAX_CHOLESKY_TILE: usize = 32;

/// Kernel `cholesky(A, L, X, Y)`: factor tile `(i, j)` of `A` into `L`,
/// then solve `A·Y = X` for the matching `T×1` column tile.
pub fn cholesky_kernel(tile_size: usize, dtype: DType) -> Result<Kernel> {
    check_tile(tile_size)?;
    let t = tile_size;
    Kernel::builder("cholesky")
        .param("A", ParamType::array2d(dtype))
        .param("L", ParamType::array2d(dtype))
        .param("X", ParamType::array2d(dtype))
        .param("Y", ParamType::array2d(dtype))
        .forward(move |inv, args| {
            let tid = inv.tid();
            let a = inv.tile_load(args.array(0)?, tid.i, tid.j, t, t)?;
            let l = tile::cholesky(&a)?;
            inv.tile_store(args.array(1)?, tid.i, tid.j, &l)?;

            let x = inv.tile_load(args.array(2)?, tid.i, tid.j, t, 1)?;
            let y = tile::cholesky_solve(&l, &x)?;
            inv.tile_store(args.array(3)?, tid.i, tid.j, &y)
        })
        .enable_backward(false)
        .build()
}

fn check_tile(tile_size: usize) -> Result<()> {
    if tile_size == 0 || tile_size > MAX_CHOLESKY_TILE {
        return Err(TesselError::InvalidArgument(format!(
            "cholesky tile must be in 1..={MAX_CHOLESKY_TILE}, got {tile_size}"
        )));
    }
    Ok(())
}

/// Configuration of the example run.
#[derive(Debug, Clone, PartialEq)]
pub struct CholeskyExample {
    pub tile: usize,
    pub dtype: DType,
    /// Diagonal shift of `A = ones + diag·I`.
    pub diag: f64,
}

impl Default for CholeskyExample {
    fn default() -> Self {
        Self {
            tile: MAX_CHOLESKY_TILE,
            dtype: DType::F64,
            diag: 5.0,
        }
    }
}

impl CholeskyExample {
    pub fn new(tile: usize, dtype: DType) -> Self {
        Self {
            tile,
            dtype,
            ..Self::default()
        }
    }

    /// `A = ones + diag·I` (row-major) and `X = [0, 1, …, T-1]ᵗ`.
    pub fn inputs(&self) -> (Vec<f64>, Vec<f64>) {
        let t = self.tile;
        let a = (0..t * t)
            .map(|idx| if idx / t == idx % t { 1.0 + self.diag } else { 1.0 })
            .collect();
        let x = (0..t).map(|v| v as f64).collect();
        (a, x)
    }

    /// Launch the kernel on `ctx` and compute the reference solution.
    pub fn run(&self, ctx: &Arc<DeviceContext>) -> Result<CholeskyReport> {
        let t = self.tile;
        let kernel = cholesky_kernel(t, self.dtype)?;
        let device = ctx.device();
        let (a_h, x_h) = self.inputs();

        let a = Array::from_values(&a_h, &[t, t], self.dtype, device)?;
        let l = Array::zeros(&[t, t], self.dtype, device)?;
        let x = Array::from_values(&x_h, &[t, 1], self.dtype, device)?;
        let y = Array::zeros(&[t, 1], self.dtype, device)?;

        launch(
            ctx,
            &kernel,
            (1, 1),
            vec![a.clone().into(), l.clone().into(), x.clone().into(), y.clone().into()],
        )
        .submit()?;
        ctx.synchronize()?;

        // reference inputs are taken back from the arrays so they carry the
        // same rounding as the kernel saw
        let a_h = a.to_vec_f64();
        let x_h = x.to_vec_f64();
        let l_ref = reference::cholesky(&a_h, t)?;
        let y_ref = reference::solve(&a_h, t, &x_h, 1)?;
        tracing::debug!(tile = t, dtype = %self.dtype, device = %device, "cholesky example ran");

        Ok(CholeskyReport {
            tile: t,
            dtype: self.dtype,
            a: a_h,
            x: x_h,
            l: l.to_vec_f64(),
            y: y.to_vec_f64(),
            l_ref,
            y_ref,
        })
    }
}

/// Outputs of one run next to the reference values.
#[derive(Debug, Clone)]
pub struct CholeskyReport {
    pub tile: usize,
    pub dtype: DType,
    pub a: Vec<f64>,
    pub x: Vec<f64>,
    pub l: Vec<f64>,
    pub y: Vec<f64>,
    pub l_ref: Vec<f64>,
    pub y_ref: Vec<f64>,
}

impl CholeskyReport {
    /// Check the factor and solution against the reference, and that
    /// `L·Lᵗ ≈ A` and `A·Y ≈ X`.
    pub fn validate(&self) -> Result<()> {
        let t = self.tile;
        let (rtol, atol) = self.dtype.tolerance();
        ensure_close("L vs reference", &self.l, &self.l_ref, rtol, atol)?;
        ensure_close("Y vs reference", &self.y, &self.y_ref, rtol, atol)?;

        let lt = reference::transpose(&self.l, t, t)?;
        let llt = reference::matmul(&self.l, &lt, t, t, t)?;
        ensure_close("L·Lᵗ vs A", &llt, &self.a, rtol, rtol * max_abs(&self.a))?;

        let ay = reference::matmul(&self.a, &self.y, t, t, 1)?;
        ensure_close("A·Y vs X", &ay, &self.x, rtol, rtol * max_abs(&self.x).max(1.0))?;
        Ok(())
    }

    /// Human-readable dump of inputs, outputs and reference values.
    pub fn render(&self) -> String {
        let t = self.tile;
        let mut out = String::new();
        let _ = writeln!(out, "A:\n{}", format_matrix(&self.a, t, t));
        let _ = writeln!(out, "L (tile):\n{}", format_matrix(&self.l, t, t));
        let _ = writeln!(out, "L (reference):\n{}", format_matrix(&self.l_ref, t, t));
        let _ = writeln!(out, "x:\n{}", format_matrix(&self.x, t, 1));
        let _ = writeln!(out, "A\\x (tile):\n{}", format_matrix(&self.y, t, 1));
        let _ = write!(out, "A\\x (reference):\n{}", format_matrix(&self.y_ref, t, 1));
        out
    }
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |m, x| m.max(x.abs()))
}

/// Row-per-line rendering of a row-major matrix.
pub fn format_matrix(data: &[f64], rows: usize, cols: usize) -> String {
    let mut out = String::new();
    for r in 0..rows {
        out.push('[');
        for c in 0..cols {
            if c > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{:>10.6}", data[r * cols + c]);
        }
        out.push(']');
        if r + 1 < rows {
            out.push('\n');
        }
    }
    out
}
