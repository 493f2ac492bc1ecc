//! Built-in tile kernels.
//!
//! Each kernel is launched over a 2D domain of tile indices `(i, j)` and
//! moves tile `(i, j)` of its inputs to tile `(i, j)` of its output. All of
//! them carry adjoints and can be recorded on a tape.

use std::sync::Arc;

use tessel_core::{DType, Result, TesselError, TileShape};

use crate::kernel::Kernel;
use crate::params::ParamType;
use crate::scalar::{BinaryFunc, UnaryFunc};
use crate::tile_ops::{map1, map1_adjoint, map2, map2_adjoint};

/// `b[tile] = a[tile]` with `m×n` tiles.
///
/// Parameters: `a`, `b`, both 2D arrays of `dtype`.
pub fn tile_copy(m: usize, n: usize, dtype: DType) -> Result<Kernel> {
    check_tile("tile_copy", m, n)?;
    Kernel::builder("tile_copy")
        .param("a", ParamType::array2d(dtype))
        .param("b", ParamType::array2d(dtype))
        .forward(move |inv, args| {
            let t = inv.tid();
            let a = inv.tile_load(args.array(0)?, t.i, t.j, m, n)?;
            inv.tile_store(args.array(1)?, t.i, t.j, &a)
        })
        .adjoint(move |inv, args| {
            let t = inv.tid();
            let g = inv.grad_tile_load(args.array(1)?, t.i, t.j, m, n)?;
            inv.grad_tile_accumulate(args.array(0)?, t.i, t.j, &g)
        })
        .build()
}

/// `out[tile] = f(input[tile])` with `m×n` tiles.
///
/// Parameters: `input`, `output`, both 2D arrays of `dtype`.
pub fn tile_unary_map<F: UnaryFunc>(f: F, m: usize, n: usize, dtype: DType) -> Result<Kernel> {
    check_tile("tile_unary_map", m, n)?;
    let name = format!("tile_unary_map_{}", f.name());
    let f = Arc::new(f);
    let fwd = Arc::clone(&f);
    Kernel::builder(&name)
        .param("input", ParamType::array2d(dtype))
        .param("output", ParamType::array2d(dtype))
        .forward(move |inv, args| {
            let t = inv.tid();
            let a = inv.tile_load(args.array(0)?, t.i, t.j, m, n)?;
            inv.tile_store(args.array(1)?, t.i, t.j, &map1(&*fwd, &a))
        })
        .adjoint(move |inv, args| {
            let t = inv.tid();
            let input = args.array(0)?;
            let a = inv.tile_load(input, t.i, t.j, m, n)?;
            let g = inv.grad_tile_load(args.array(1)?, t.i, t.j, m, n)?;
            inv.grad_tile_accumulate(input, t.i, t.j, &map1_adjoint(&*f, &a, &g)?)
        })
        .build()
}

/// `out[tile] = f(a[tile], b[tile])` with `m×n` tiles on both inputs.
///
/// Parameters: `a`, `b`, `out`, all 2D arrays of `dtype`.
pub fn tile_binary_map<F: BinaryFunc>(f: F, m: usize, n: usize, dtype: DType) -> Result<Kernel> {
    let shape = TileShape::new(m, n);
    tile_binary_map_shaped(f, shape, shape, dtype)
}

/// Like [`tile_binary_map`] with the tile shape of each input given
/// separately. Tile maps never broadcast, so differing shapes are rejected
/// when the kernel is built.
pub fn tile_binary_map_shaped<F: BinaryFunc>(
    f: F,
    a_shape: TileShape,
    b_shape: TileShape,
    dtype: DType,
) -> Result<Kernel> {
    if a_shape != b_shape {
        return Err(TesselError::ShapeMismatch {
            expected: vec![a_shape.rows, a_shape.cols],
            got: vec![b_shape.rows, b_shape.cols],
        });
    }
    let TileShape { rows: m, cols: n } = a_shape;
    check_tile("tile_binary_map", m, n)?;
    let name = format!("tile_binary_map_{}", f.name());
    let f = Arc::new(f);
    let fwd = Arc::clone(&f);
    Kernel::builder(&name)
        .param("a", ParamType::array2d(dtype))
        .param("b", ParamType::array2d(dtype))
        .param("out", ParamType::array2d(dtype))
        .forward(move |inv, args| {
            let t = inv.tid();
            let a = inv.tile_load(args.array(0)?, t.i, t.j, m, n)?;
            let b = inv.tile_load(args.array(1)?, t.i, t.j, m, n)?;
            inv.tile_store(args.array(2)?, t.i, t.j, &map2(&*fwd, &a, &b)?)
        })
        .adjoint(move |inv, args| {
            let t = inv.tid();
            let (a_arr, b_arr) = (args.array(0)?, args.array(1)?);
            let a = inv.tile_load(a_arr, t.i, t.j, m, n)?;
            let b = inv.tile_load(b_arr, t.i, t.j, m, n)?;
            let g = inv.grad_tile_load(args.array(2)?, t.i, t.j, m, n)?;
            let (da, db) = map2_adjoint(&*f, &a, &b, &g)?;
            inv.grad_tile_accumulate(a_arr, t.i, t.j, &da)?;
            inv.grad_tile_accumulate(b_arr, t.i, t.j, &db)
        })
        .build()
}

fn check_tile(kernel: &str, m: usize, n: usize) -> Result<()> {
    if m == 0 || n == 0 {
        return Err(TesselError::InvalidArgument(format!(
            "{kernel}: tile extent must be non-zero, got {m}x{n}"
        )));
    }
    Ok(())
}
