//! Elementwise tile maps and their adjoints.

use tessel_core::{Result, TesselError, Tile};

use crate::scalar::{BinaryFunc, UnaryFunc};

/// `f` applied to every element of `a`.
pub fn map1<F: UnaryFunc>(f: &F, a: &Tile) -> Tile {
    a.map(|x| f.value(x))
}

/// `f` applied to corresponding elements of `a` and `b`. Shapes must match.
pub fn map2<F: BinaryFunc>(f: &F, a: &Tile, b: &Tile) -> Result<Tile> {
    a.zip_map(b, |x, y| f.value(x, y))
}

/// Adjoint of [`map1`]: `f'(a) · grad_out`.
pub fn map1_adjoint<F: UnaryFunc>(f: &F, a: &Tile, grad_out: &Tile) -> Result<Tile> {
    a.zip_map(grad_out, |x, g| f.derivative(x) * g)
}

/// Adjoint of [`map2`]: `(∂f/∂a · grad_out, ∂f/∂b · grad_out)`.
pub fn map2_adjoint<F: BinaryFunc>(f: &F, a: &Tile, b: &Tile, grad_out: &Tile) -> Result<(Tile, Tile)> {
    if a.shape() != b.shape() || a.shape() != grad_out.shape() {
        return Err(TesselError::ShapeMismatch {
            expected: vec![a.rows(), a.cols()],
            got: if a.shape() != b.shape() {
                vec![b.rows(), b.cols()]
            } else {
                vec![grad_out.rows(), grad_out.cols()]
            },
        });
    }
    let rows = a.rows();
    let cols = a.cols();
    let mut da = Vec::with_capacity(rows * cols);
    let mut db = Vec::with_capacity(rows * cols);
    for ((&x, &y), &g) in a.as_slice().iter().zip(b.as_slice()).zip(grad_out.as_slice()) {
        let (px, py) = f.partials(x, y);
        da.push(px * g);
        db.push(py * g);
    }
    Ok((Tile::new(rows, cols, &da)?, Tile::new(rows, cols, &db)?))
}
