//! Launch styles: direct, stream, recorded command and captured graph,
//! plus struct-parameter marshaling and device errors.
//! Run with: cargo test -p tessel-kernels --test launch_styles

use std::sync::Arc;

use tessel_core::{memory, Array, DType, Device, TesselError};
use tessel_kernels::graph::{capture, Capture};
use tessel_kernels::{get_device, launch, Kernel, ParamConvention, ParamType, StructDef, StructValue, Stream, Vec3};

const N: usize = 1024;

fn inc_kernel() -> Kernel {
    Kernel::builder("inc")
        .param("a", ParamType::array1d(DType::F32))
        .forward(|inv, args| {
            let i = inv.tid().i;
            inv.atomic_add(args.array(0)?, i, 1.0)
        })
        .build()
        .unwrap()
}

#[test]
fn test_all_styles_increment() {
    let device = Device::Accel(2);
    let ctx = get_device(device).unwrap();
    let kernel = inc_kernel();
    let a = Array::zeros(&[N], DType::F32, device).unwrap();

    // direct
    launch(&ctx, &kernel, N, vec![a.clone().into()]).submit().unwrap();

    // stream
    let stream = Stream::new(&ctx).unwrap();
    launch(&ctx, &kernel, N, vec![a.clone().into()]).stream(&stream).submit().unwrap();
    stream.synchronize().unwrap();

    // recorded command
    let cmd = launch(&ctx, &kernel, N, vec![a.clone().into()]).record_cmd().unwrap();
    cmd.launch().unwrap();
    cmd.launch_on(&stream).unwrap();
    stream.synchronize().unwrap();

    // graph
    let graph = capture(&ctx, |cap| {
        launch(&ctx, &kernel, N, vec![a.clone().into()]).capture(cap).submit()
    })
    .unwrap();
    graph.launch().unwrap();
    graph.launch_on(&stream).unwrap();
    ctx.synchronize().unwrap();

    assert_eq!(a.to_vec_f64(), vec![6.0; N]);
}

#[test]
fn test_stream_preserves_order() {
    let ctx = get_device(Device::Accel(2)).unwrap();
    let stream = Stream::new(&ctx).unwrap();
    let a = Array::zeros(&[N], DType::F32, Device::Accel(2)).unwrap();

    let set = Kernel::builder("set")
        .param("a", ParamType::array1d(DType::F32))
        .param("v", ParamType::F32)
        .forward(|inv, args| inv.store(args.array(0)?, inv.tid().i, args.f32(1)? as f64))
        .build()
        .unwrap();
    let double = Kernel::builder("double")
        .param("a", ParamType::array1d(DType::F32))
        .forward(|inv, args| {
            let a = args.array(0)?;
            let i = inv.tid().i;
            inv.store(a, i, 2.0 * inv.load(a, i)?)
        })
        .build()
        .unwrap();

    for round in 0..10 {
        launch(&ctx, &set, N, vec![a.clone().into(), (round as f32).into()])
            .stream(&stream)
            .submit()
            .unwrap();
        launch(&ctx, &double, N, vec![a.clone().into()]).stream(&stream).submit().unwrap();
    }
    stream.synchronize().unwrap();
    assert_eq!(a.to_vec_f64(), vec![18.0; N]);
}

#[test]
fn test_stream_error_surfaces_on_synchronize() {
    let ctx = get_device(Device::Cpu).unwrap();
    let stream = Stream::new(&ctx).unwrap();
    let a = Array::zeros(&[4], DType::F32, Device::Cpu).unwrap();
    // enqueueing succeeds; the out-of-range invocations fail later
    launch(&ctx, &inc_kernel(), 8, vec![a.into()]).stream(&stream).submit().unwrap();
    assert!(matches!(stream.synchronize(), Err(TesselError::InvalidArgument(_))));
    stream.synchronize().unwrap();
}

#[test]
fn test_struct_and_flat_bit_identical() {
    let ctx = get_device(Device::Accel(2)).unwrap();
    let device = ctx.device();
    let def = StructDef::new("Params")
        .field("scale", ParamType::F32)
        .field("offset", ParamType::Vec3)
        .build()
        .unwrap();

    let flat = Kernel::builder("affine_flat")
        .param("out", ParamType::array1d(DType::F32))
        .param("scale", ParamType::F32)
        .param("offset", ParamType::Vec3)
        .forward(|inv, args| {
            let i = inv.tid().i;
            let v = args.vec3(2)?;
            let value = args.f32(1)? * i as f32 + v.x() - v.y() * v.z();
            inv.store(args.array(0)?, i, value as f64)
        })
        .build()
        .unwrap();
    let packed = Kernel::builder("affine_struct")
        .param("out", ParamType::array1d(DType::F32))
        .param("p", ParamType::Struct(Arc::clone(&def)))
        .forward(|inv, args| {
            let i = inv.tid().i;
            let p = args.structure(1)?;
            let v = p.vec3("offset")?;
            let value = p.f32("scale")? * i as f32 + v.x() - v.y() * v.z();
            inv.store(args.array(0)?, i, value as f64)
        })
        .build()
        .unwrap();
    // two parameters: flat marshaling even though one is a struct
    assert_eq!(packed.convention(), &ParamConvention::Flat);

    let scale = 0.37f32;
    let offset = Vec3::new(1.5, -0.25, 3.0);
    let value = StructValue::builder(&def)
        .set("scale", scale)
        .unwrap()
        .set("offset", offset)
        .unwrap()
        .build()
        .unwrap();

    let a = Array::zeros(&[N], DType::F32, device).unwrap();
    let b = Array::zeros(&[N], DType::F32, device).unwrap();
    launch(&ctx, &flat, N, vec![a.clone().into(), scale.into(), offset.into()]).submit().unwrap();
    launch(&ctx, &packed, N, vec![b.clone().into(), value.into()]).submit().unwrap();
    assert_eq!(a.to_vec_f32(), b.to_vec_f32());
}

#[test]
fn test_capture_records_without_running() {
    let ctx = get_device(Device::Cpu).unwrap();
    let a = Array::zeros(&[N], DType::F32, Device::Cpu).unwrap();
    let kernel = inc_kernel();
    let mut cap = Capture::begin(&ctx);
    for _ in 0..4 {
        launch(&ctx, &kernel, N, vec![a.clone().into()]).capture(&mut cap).submit().unwrap();
    }
    assert_eq!(a.to_vec_f64(), vec![0.0; N]);
    let graph = cap.end().unwrap();
    for _ in 0..10 {
        graph.launch().unwrap();
    }
    assert_eq!(a.to_vec_f64(), vec![40.0; N]);
}

#[test]
fn test_device_mismatch_rejected() {
    let ctx = get_device(Device::Cpu).unwrap();
    let a = Array::zeros(&[N], DType::F32, Device::Accel(2)).unwrap();
    let err = launch(&ctx, &inc_kernel(), N, vec![a.into()]).submit().unwrap_err();
    assert!(matches!(err, TesselError::DeviceMismatch { .. }));

    let accel = get_device(Device::Accel(2)).unwrap();
    let stream = Stream::new(&accel).unwrap();
    let b = Array::zeros(&[N], DType::F32, Device::Cpu).unwrap();
    let cmd = launch(&ctx, &inc_kernel(), N, vec![b.into()]).record_cmd().unwrap();
    assert!(matches!(cmd.launch_on(&stream), Err(TesselError::DeviceMismatch { .. })));
}

#[test]
fn test_out_of_memory_propagates() {
    let device = Device::Accel(3);
    memory::set_limit(device, Some(4 * N));
    let first = Array::zeros(&[N], DType::F32, device).unwrap();
    let err = Array::zeros(&[N], DType::F32, device).unwrap_err();
    assert!(matches!(err, TesselError::OutOfMemory { .. }));
    drop(first);
    Array::zeros(&[N], DType::F32, device).unwrap();
    memory::set_limit(device, None);
}
