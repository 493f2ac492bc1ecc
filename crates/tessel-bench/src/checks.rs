//! Tile verification scenarios.
//!
//! Each scenario launches a tile kernel under a tape on random 2D inputs,
//! compares the forward result against a host computation, seeds the output
//! gradient with ones, runs the backward pass and compares the input
//! gradients against their analytic values.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tessel_autograd::scope;
use tessel_core::compare::{ensure_close, max_abs_diff};
use tessel_core::{Array, DType, Result};
use tessel_kernels::builtin::{tile_binary_map, tile_copy, tile_unary_map};
use tessel_kernels::scalar::{Sin, SinPlus};
use tessel_kernels::{launch, DeviceContext};

pub const TILE_M: usize = 8;
pub const TILE_N: usize = 4;
pub const M: usize = TILE_M * 7;
pub const N: usize = TILE_N * 5;

const RTOL: f64 = 1e-4;
const ATOL: f64 = 1e-5;

/// Worst deviations seen by one scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckOutcome {
    pub name: &'static str,
    pub forward_err: f64,
    pub grad_err: f64,
}

fn grid() -> (usize, usize) {
    (M / TILE_M, N / TILE_N)
}

fn random_input(ctx: &DeviceContext, rng: &mut StdRng) -> Result<Array> {
    Array::random_uniform(&[M, N], DType::F32, ctx.device(), rng)?.with_grad()
}

fn output(ctx: &DeviceContext) -> Result<Array> {
    Array::zeros(&[M, N], DType::F32, ctx.device())?.with_grad()
}

fn grad_of(a: &Array) -> Vec<f64> {
    a.grad().map(|g| g.to_vec_f64()).unwrap_or_default()
}

fn seed_ones(a: &Array) {
    if let Some(g) = a.grad() {
        g.fill(1.0);
    }
}

/// `b = a`, `∂a = ∂b`.
pub fn check_copy(ctx: &Arc<DeviceContext>, seed: u64) -> Result<CheckOutcome> {
    let mut rng = StdRng::seed_from_u64(seed);
    let kernel = tile_copy(TILE_M, TILE_N, DType::F32)?;
    let a = random_input(ctx, &mut rng)?;
    let b = output(ctx)?;

    let (mut tape, out) = scope::record(|tape| {
        launch(ctx, &kernel, grid(), vec![a.clone().into(), b.clone().into()])
            .tape(tape)
            .submit()
    });
    out?;
    ctx.synchronize()?;
    let expected = a.to_vec_f64();
    let actual = b.to_vec_f64();
    ensure_close("tile_copy forward", &actual, &expected, RTOL, ATOL)?;

    seed_ones(&b);
    tape.backward()?;
    let grad = grad_of(&a);
    let ones = vec![1.0; M * N];
    ensure_close("tile_copy grad", &grad, &ones, RTOL, ATOL)?;

    Ok(CheckOutcome {
        name: "tile_copy",
        forward_err: max_abs_diff(&actual, &expected),
        grad_err: max_abs_diff(&grad, &ones),
    })
}

/// `out = sin(in)`, `∂in = cos(in)`.
pub fn check_unary_sin(ctx: &Arc<DeviceContext>, seed: u64) -> Result<CheckOutcome> {
    let mut rng = StdRng::seed_from_u64(seed);
    let kernel = tile_unary_map(Sin, TILE_M, TILE_N, DType::F32)?;
    let input = random_input(ctx, &mut rng)?;
    let out_arr = output(ctx)?;

    let (mut tape, out) = scope::record(|tape| {
        launch(ctx, &kernel, grid(), vec![input.clone().into(), out_arr.clone().into()])
            .tape(tape)
            .submit()
    });
    out?;
    ctx.synchronize()?;
    let x = input.to_vec_f64();
    let expected: Vec<f64> = x.iter().map(|v| v.sin()).collect();
    let actual = out_arr.to_vec_f64();
    ensure_close("tile_unary_map forward", &actual, &expected, RTOL, ATOL)?;

    seed_ones(&out_arr);
    tape.backward()?;
    let grad = grad_of(&input);
    let expected_grad: Vec<f64> = x.iter().map(|v| v.cos()).collect();
    ensure_close("tile_unary_map grad", &grad, &expected_grad, RTOL, ATOL)?;

    Ok(CheckOutcome {
        name: "tile_unary_map",
        forward_err: max_abs_diff(&actual, &expected),
        grad_err: max_abs_diff(&grad, &expected_grad),
    })
}

/// `c = sin(a) + b`, `∂a = cos(a)`, `∂b = 1`.
pub fn check_binary_sin_plus(ctx: &Arc<DeviceContext>, seed: u64) -> Result<CheckOutcome> {
    let mut rng = StdRng::seed_from_u64(seed);
    let kernel = tile_binary_map(SinPlus, TILE_M, TILE_N, DType::F32)?;
    let a = random_input(ctx, &mut rng)?;
    let b = random_input(ctx, &mut rng)?;
    let c = output(ctx)?;

    let (mut tape, out) = scope::record(|tape| {
        launch(ctx, &kernel, grid(), vec![a.clone().into(), b.clone().into(), c.clone().into()])
            .tape(tape)
            .submit()
    });
    out?;
    ctx.synchronize()?;
    let av = a.to_vec_f64();
    let bv = b.to_vec_f64();
    let expected: Vec<f64> = av.iter().zip(&bv).map(|(x, y)| x.sin() + y).collect();
    let actual = c.to_vec_f64();
    ensure_close("tile_binary_map forward", &actual, &expected, RTOL, ATOL)?;

    seed_ones(&c);
    tape.backward()?;
    let grad_a = grad_of(&a);
    let grad_b = grad_of(&b);
    let expected_a: Vec<f64> = av.iter().map(|v| v.cos()).collect();
    let ones = vec![1.0; M * N];
    ensure_close("tile_binary_map grad a", &grad_a, &expected_a, RTOL, ATOL)?;
    ensure_close("tile_binary_map grad b", &grad_b, &ones, RTOL, ATOL)?;

    Ok(CheckOutcome {
        name: "tile_binary_map",
        forward_err: max_abs_diff(&actual, &expected),
        grad_err: max_abs_diff(&grad_a, &expected_a).max(max_abs_diff(&grad_b, &ones)),
    })
}

/// Run every scenario on `ctx`, stopping at the first failure.
pub fn run_all(ctx: &Arc<DeviceContext>, seed: u64) -> Result<Vec<CheckOutcome>> {
    let outcomes = vec![
        check_copy(ctx, seed)?,
        check_unary_sin(ctx, seed)?,
        check_binary_sin_plus(ctx, seed)?,
    ];
    for o in &outcomes {
        tracing::info!(device = %ctx.device(), check = o.name, forward_err = o.forward_err, grad_err = o.grad_err, "passed");
    }
    Ok(outcomes)
}
