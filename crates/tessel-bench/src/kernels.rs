//! Kernels exercised by the launch benchmarks.

use std::sync::Arc;

use tessel_core::{DType, Result};
use tessel_kernels::{Kernel, KernelBuilder, ParamType, StructDef, Vec3};

/// Elements touched by the increment kernel.
pub const N: usize = 8192;

/// `a[tid] = a[tid] + 1`.
pub fn inc_kernel() -> Result<Kernel> {
    Kernel::builder("inc_kernel")
        .param("a", ParamType::array1d(DType::F32))
        .forward(|inv, args| {
            let a = args.array(0)?;
            let i = inv.tid().i;
            inv.store(a, i, inv.load(a, i)? + 1.0)
        })
        .enable_backward(false)
        .build()
}

/// Struct `Sz`: three arrays, three scalars, three vectors.
pub fn sz_def() -> Result<Arc<StructDef>> {
    let f32_array = ParamType::array1d(DType::F32);
    StructDef::new("Sz")
        .field("a", f32_array.clone())
        .field("b", f32_array.clone())
        .field("c", f32_array)
        .field("x", ParamType::F32)
        .field("y", ParamType::F32)
        .field("z", ParamType::F32)
        .field("u", ParamType::Vec3)
        .field("v", ParamType::Vec3)
        .field("w", ParamType::Vec3)
        .build()
}

/// The empty struct `S0`.
pub fn s0_def() -> Result<Arc<StructDef>> {
    StructDef::new("S0").build()
}

fn flat_params(builder: KernelBuilder) -> KernelBuilder {
    let f32_array = ParamType::array1d(DType::F32);
    builder
        .param("a", f32_array.clone())
        .param("b", f32_array.clone())
        .param("c", f32_array)
        .param("x", ParamType::F32)
        .param("y", ParamType::F32)
        .param("z", ParamType::F32)
        .param("u", ParamType::Vec3)
        .param("v", ParamType::Vec3)
        .param("w", ParamType::Vec3)
}

/// Nine flat parameters, empty body.
pub fn kz() -> Result<Kernel> {
    flat_params(Kernel::builder("kz"))
        .forward(|inv, _| {
            let _ = inv.tid();
            Ok(())
        })
        .enable_backward(false)
        .build()
}

/// One `Sz` parameter, empty body.
pub fn ksz(def: &Arc<StructDef>) -> Result<Kernel> {
    Kernel::builder("ksz")
        .param("s", ParamType::Struct(Arc::clone(def)))
        .forward(|inv, _| {
            let _ = inv.tid();
            Ok(())
        })
        .enable_backward(false)
        .build()
}

/// No parameters, empty body.
pub fn k0() -> Result<Kernel> {
    Kernel::builder("k0")
        .forward(|inv, _| {
            let _ = inv.tid();
            Ok(())
        })
        .enable_backward(false)
        .build()
}

/// One `S0` parameter, empty body.
pub fn ks0(def: &Arc<StructDef>) -> Result<Kernel> {
    Kernel::builder("ks0")
        .param("s", ParamType::Struct(Arc::clone(def)))
        .forward(|inv, _| {
            let _ = inv.tid();
            Ok(())
        })
        .enable_backward(false)
        .build()
}

/// The values both writing kernels store into `a`, `b` and `c`.
pub fn combine(x: f32, y: f32, z: f32, u: Vec3, v: Vec3, w: Vec3) -> [f32; 3] {
    [
        x + u.x() * v.y() - w.z(),
        y * w.x() + u.y() - v.z(),
        z - v.x() * u.z() + w.y(),
    ]
}

/// Like [`kz`], but stores `combine(..)` into `a`, `b`, `c`.
pub fn kz_write() -> Result<Kernel> {
    flat_params(Kernel::builder("kz_write"))
        .forward(|inv, args| {
            let i = inv.tid().i;
            let out = combine(
                args.f32(3)?,
                args.f32(4)?,
                args.f32(5)?,
                args.vec3(6)?,
                args.vec3(7)?,
                args.vec3(8)?,
            );
            for (slot, value) in out.iter().enumerate() {
                inv.store(args.array(slot)?, i, *value as f64)?;
            }
            Ok(())
        })
        .enable_backward(false)
        .build()
}

/// Like [`ksz`], but stores `combine(..)` into the struct's arrays.
pub fn ksz_write(def: &Arc<StructDef>) -> Result<Kernel> {
    Kernel::builder("ksz_write")
        .param("s", ParamType::Struct(Arc::clone(def)))
        .forward(|inv, args| {
            let i = inv.tid().i;
            let s = args.structure(0)?;
            let out = combine(
                s.f32("x")?,
                s.f32("y")?,
                s.f32("z")?,
                s.vec3("u")?,
                s.vec3("v")?,
                s.vec3("w")?,
            );
            for (name, value) in ["a", "b", "c"].iter().zip(out) {
                inv.store(s.array(name)?, i, value as f64)?;
            }
            Ok(())
        })
        .enable_backward(false)
        .build()
}
