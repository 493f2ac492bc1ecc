//! Tile copy and map kernels: forward values and gradients through a tape.
//! Run with: cargo test -p tessel-kernels --test tile_autodiff

use rand::rngs::StdRng;
use rand::SeedableRng;
use tessel_autograd::{scope, Tape};
use tessel_core::{Array, DType, Device, TesselError};
use tessel_kernels::builtin::{tile_binary_map, tile_copy, tile_unary_map};
use tessel_kernels::scalar::{Sin, SinPlus};
use tessel_kernels::{get_device, launch, Kernel, ParamType, Stream};

const TILE_M: usize = 8;
const TILE_N: usize = 4;
const M: usize = TILE_M * 7;
const N: usize = TILE_N * 5;

const DEVICES: [Device; 2] = [Device::Cpu, Device::Accel(0)];

fn assert_close(a: &[f64], b: &[f64], tol: f64) {
    assert_eq!(a.len(), b.len(), "length mismatch: {} vs {}", a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!(
            (x - y).abs() <= tol * (1.0 + y.abs()),
            "element {} differs: {} vs {} (tol={})",
            i, x, y, tol
        );
    }
}

fn random(device: Device, rng: &mut StdRng) -> Array {
    Array::random_uniform(&[M, N], DType::F32, device, rng)
        .unwrap()
        .with_grad()
        .unwrap()
}

// ============================================================================
// Copy
// ============================================================================

#[test]
fn test_tile_copy_forward_and_grad() {
    for device in DEVICES {
        let ctx = get_device(device).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let kernel = tile_copy(TILE_M, TILE_N, DType::F32).unwrap();

        let a = random(device, &mut rng);
        let b = Array::zeros(&[M, N], DType::F32, device).unwrap().with_grad().unwrap();

        let (mut tape, out) = scope::record(|tape| {
            launch(&ctx, &kernel, (M / TILE_M, N / TILE_N), vec![a.clone().into(), b.clone().into()])
                .tape(tape)
                .submit()
        });
        out.unwrap();
        assert_eq!(a.to_vec_f32(), b.to_vec_f32());

        b.grad().unwrap().fill(1.0);
        tape.backward().unwrap();
        assert_eq!(a.grad().unwrap().to_vec_f32(), b.grad().unwrap().to_vec_f32());
    }
}

// ============================================================================
// Unary map
// ============================================================================

#[test]
fn test_tile_unary_map_sin() {
    for device in DEVICES {
        let ctx = get_device(device).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let kernel = tile_unary_map(Sin, TILE_M, TILE_N, DType::F32).unwrap();

        let input = random(device, &mut rng);
        let output = Array::zeros(&[M, N], DType::F32, device).unwrap().with_grad().unwrap();

        let (mut tape, out) = scope::record(|tape| {
            launch(&ctx, &kernel, (M / TILE_M, N / TILE_N), vec![input.clone().into(), output.clone().into()])
                .tape(tape)
                .submit()
        });
        out.unwrap();

        let x = input.to_vec_f64();
        let expected: Vec<f64> = x.iter().map(|v| v.sin()).collect();
        assert_close(&output.to_vec_f64(), &expected, 1e-4);

        output.grad().unwrap().fill(1.0);
        tape.backward().unwrap();
        let expected: Vec<f64> = x.iter().map(|v| v.cos()).collect();
        assert_close(&input.grad().unwrap().to_vec_f64(), &expected, 1e-4);
    }
}

// ============================================================================
// Binary map
// ============================================================================

#[test]
fn test_tile_binary_map_sin_plus() {
    for device in DEVICES {
        let ctx = get_device(device).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let kernel = tile_binary_map(SinPlus, TILE_M, TILE_N, DType::F32).unwrap();

        let a = random(device, &mut rng);
        let b = random(device, &mut rng);
        let c = Array::zeros(&[M, N], DType::F32, device).unwrap().with_grad().unwrap();

        let (mut tape, out) = scope::record(|tape| {
            launch(
                &ctx,
                &kernel,
                (M / TILE_M, N / TILE_N),
                vec![a.clone().into(), b.clone().into(), c.clone().into()],
            )
            .tape(tape)
            .submit()
        });
        out.unwrap();

        let av = a.to_vec_f64();
        let bv = b.to_vec_f64();
        let expected: Vec<f64> = av.iter().zip(&bv).map(|(x, y)| x.sin() + y).collect();
        assert_close(&c.to_vec_f64(), &expected, 1e-4);

        c.grad().unwrap().fill(1.0);
        tape.backward().unwrap();
        let expected: Vec<f64> = av.iter().map(|v| v.cos()).collect();
        assert_close(&a.grad().unwrap().to_vec_f64(), &expected, 1e-4);
        assert_close(&b.grad().unwrap().to_vec_f64(), &vec![1.0; M * N], 1e-4);
    }
}

// ============================================================================
// Accumulation and tape lifecycle
// ============================================================================

#[test]
fn test_gradient_sums_over_consumers() {
    let ctx = get_device(Device::Accel(1)).unwrap();
    let copy = tile_copy(TILE_M, TILE_N, DType::F64).unwrap();
    let x = Array::arange(&[M, N], DType::F64, Device::Accel(1)).unwrap().with_grad().unwrap();
    let y1 = Array::zeros(&[M, N], DType::F64, Device::Accel(1)).unwrap().with_grad().unwrap();
    let y2 = Array::zeros(&[M, N], DType::F64, Device::Accel(1)).unwrap().with_grad().unwrap();

    let mut tape = Tape::new();
    tape.begin().unwrap();
    for y in [&y1, &y2] {
        launch(&ctx, &copy, (M / TILE_M, N / TILE_N), vec![x.clone().into(), y.into()])
            .tape(&mut tape)
            .submit()
            .unwrap();
    }
    tape.close().unwrap();
    assert_eq!(tape.names(), vec!["tile_copy", "tile_copy"]);

    y1.grad().unwrap().fill(2.0);
    y2.grad().unwrap().fill(3.0);
    tape.backward().unwrap();
    assert_eq!(x.grad().unwrap().to_vec_f64(), vec![5.0; M * N]);

    assert!(matches!(tape.backward(), Err(TesselError::TapeConsumed)));
}

#[test]
fn test_backward_ignores_failing_sibling_stream() {
    let device = Device::Accel(2);
    let ctx = get_device(device).unwrap();
    let inc = Kernel::builder("inc")
        .param("a", ParamType::array1d(DType::F32))
        .forward(|inv, args| inv.atomic_add(args.array(0)?, inv.tid().i, 1.0))
        .build()
        .unwrap();
    let other = Stream::new(&ctx).unwrap();
    let short = Array::zeros(&[4], DType::F32, device).unwrap();
    // 8 invocations over 4 elements: fails once it runs
    launch(&ctx, &inc, 8, vec![short.into()]).stream(&other).submit().unwrap();

    let copy = tile_copy(TILE_M, TILE_N, DType::F32).unwrap();
    let x = Array::arange(&[M, N], DType::F32, device).unwrap().with_grad().unwrap();
    let y = Array::zeros(&[M, N], DType::F32, device).unwrap().with_grad().unwrap();
    let (mut tape, out) = scope::record(|tape| {
        launch(&ctx, &copy, (M / TILE_M, N / TILE_N), vec![x.clone().into(), y.clone().into()])
            .tape(tape)
            .submit()
    });
    out.unwrap();

    y.grad().unwrap().fill(1.0);
    tape.backward().unwrap();
    assert_eq!(x.grad().unwrap().to_vec_f64(), vec![1.0; M * N]);

    // the failure is still owed to the stream that raised it
    assert!(matches!(other.synchronize(), Err(TesselError::InvalidArgument(_))));
    other.synchronize().unwrap();
}

#[test]
fn test_backward_waits_for_forward_stream() {
    let ctx = get_device(Device::Accel(0)).unwrap();
    let stream = Stream::new(&ctx).unwrap();
    let kernel = tile_unary_map(Sin, TILE_M, TILE_N, DType::F64).unwrap();
    let x = Array::arange(&[M, N], DType::F64, Device::Accel(0)).unwrap().with_grad().unwrap();
    let y = Array::zeros(&[M, N], DType::F64, Device::Accel(0)).unwrap().with_grad().unwrap();

    let mut tape = Tape::new();
    tape.begin().unwrap();
    launch(&ctx, &kernel, (M / TILE_M, N / TILE_N), vec![x.clone().into(), y.clone().into()])
        .stream(&stream)
        .tape(&mut tape)
        .submit()
        .unwrap();
    tape.close().unwrap();

    y.grad().unwrap().fill(1.0);
    tape.backward().unwrap();
    stream.synchronize().unwrap();
    let expected: Vec<f64> = x.to_vec_f64().iter().map(|v| v.cos()).collect();
    assert_close(&x.grad().unwrap().to_vec_f64(), &expected, 1e-12);
    assert_close(&y.to_vec_f64(), &x.to_vec_f64().iter().map(|v| v.sin()).collect::<Vec<_>>(), 1e-12);
}

#[test]
fn test_overlapping_tile_stores_rejected() {
    let ctx = get_device(Device::Cpu).unwrap();
    let copy = tile_copy(TILE_M, TILE_N, DType::F32).unwrap();
    let a = Array::zeros(&[TILE_M, TILE_N], DType::F32, Device::Cpu).unwrap();
    let b = Array::zeros(&[TILE_M, TILE_N], DType::F32, Device::Cpu).unwrap();
    // the k axis repeats tile (0, 0)
    let err = launch(&ctx, &copy, (1, 1, 2), vec![a.into(), b.into()])
        .submit()
        .unwrap_err();
    assert!(matches!(err, TesselError::OverlappingStore { first: 0, second: 1, .. }));
}

#[test]
fn test_out_of_bounds_tile_rejected() {
    let ctx = get_device(Device::Cpu).unwrap();
    let copy = tile_copy(TILE_M, TILE_N, DType::F32).unwrap();
    let a = Array::zeros(&[M - 1, N], DType::F32, Device::Cpu).unwrap();
    let b = Array::zeros(&[M - 1, N], DType::F32, Device::Cpu).unwrap();
    let err = launch(&ctx, &copy, (M / TILE_M, N / TILE_N), vec![a.into(), b.into()])
        .submit()
        .unwrap_err();
    assert!(matches!(err, TesselError::TileOutOfBounds { .. }));
}
