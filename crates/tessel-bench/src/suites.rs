//! Launch-overhead benchmark suites.
//!
//! - `KernelLaunch`: direct launch, launch on a stream, recorded command
//! - `KernelLaunchParameters`: nine flat parameters vs one packed struct,
//!   and no parameters vs an empty struct
//! - `GraphLaunch`: ten replays of a captured graph, directly or on a stream

use std::sync::Arc;

use tessel_core::compare::ensure_close;
use tessel_core::{Array, DType, Device, Result};
use tessel_kernels::{
    capture, get_device, launch, Arg, DeviceContext, Graph, Kernel, LaunchCommand, Stream, StructDef, StructValue,
    Vec3,
};

use crate::harness::{BenchConfig, Suite};
use crate::kernels::{self, N};

/// Single-kernel launch styles over the increment kernel.
pub struct KernelLaunch {
    ctx: Arc<DeviceContext>,
    kernel: Kernel,
    array: Array,
    stream: Stream,
    cmd: LaunchCommand,
}

impl KernelLaunch {
    pub const CASES: &'static [&'static str] = &["standard_launch", "launch_on_stream", "launch_object"];

    pub fn setup(device: Device) -> Result<Self> {
        let ctx = get_device(device)?;
        let kernel = kernels::inc_kernel()?;
        let array = Array::zeros(&[N], DType::F32, device)?;
        let stream = Stream::new(&ctx)?;
        let cmd = launch(&ctx, &kernel, N, vec![array.clone().into()]).record_cmd()?;
        ctx.synchronize()?;
        Ok(Self {
            ctx,
            kernel,
            array,
            stream,
            cmd,
        })
    }

    /// The array every case increments.
    pub fn array(&self) -> &Array {
        &self.array
    }
}

impl Suite for KernelLaunch {
    fn name(&self) -> &'static str {
        "KernelLaunch"
    }

    fn cases(&self) -> &'static [&'static str] {
        Self::CASES
    }

    fn default_config(&self) -> BenchConfig {
        BenchConfig::new(10_000, 8, 5)
    }

    fn call(&mut self, case: usize) -> Result<()> {
        match case {
            0 => launch(&self.ctx, &self.kernel, N, vec![self.array.clone().into()]).submit(),
            1 => launch(&self.ctx, &self.kernel, N, vec![self.array.clone().into()])
                .stream(&self.stream)
                .submit(),
            _ => self.cmd.launch(),
        }
    }

    fn synchronize(&self) -> Result<()> {
        self.stream.synchronize()?;
        self.ctx.synchronize()
    }
}

/// Argument-marshaling cost: flat vs struct parameters.
pub struct KernelLaunchParameters {
    ctx: Arc<DeviceContext>,
    kz: Kernel,
    ksz: Kernel,
    k0: Kernel,
    ks0: Kernel,
    flat_args: Vec<Arg>,
    sz: StructValue,
    s0: StructValue,
}

/// The benchmark's fixed parameter values.
pub struct ParamValues {
    pub a: Array,
    pub b: Array,
    pub c: Array,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub u: Vec3,
    pub v: Vec3,
    pub w: Vec3,
}

impl ParamValues {
    pub fn new(n: usize, device: Device) -> Result<Self> {
        Ok(Self {
            a: Array::zeros(&[n], DType::F32, device)?,
            b: Array::zeros(&[n], DType::F32, device)?,
            c: Array::zeros(&[n], DType::F32, device)?,
            x: 17.0,
            y: 42.0,
            z: 99.0,
            u: Vec3::new(1.0, 2.0, 3.0),
            v: Vec3::new(10.0, 20.0, 30.0),
            w: Vec3::new(100.0, 200.0, 300.0),
        })
    }

    pub fn flat_args(&self) -> Vec<Arg> {
        vec![
            (&self.a).into(),
            (&self.b).into(),
            (&self.c).into(),
            self.x.into(),
            self.y.into(),
            self.z.into(),
            self.u.into(),
            self.v.into(),
            self.w.into(),
        ]
    }

    /// The same values packed into an `Sz` struct.
    pub fn packed(&self, def: &Arc<StructDef>) -> Result<StructValue> {
        StructValue::builder(def)
            .set("a", &self.a)?
            .set("b", &self.b)?
            .set("c", &self.c)?
            .set("x", self.x)?
            .set("y", self.y)?
            .set("z", self.z)?
            .set("u", self.u)?
            .set("v", self.v)?
            .set("w", self.w)?
            .build()
    }
}

impl KernelLaunchParameters {
    pub const CASES: &'static [&'static str] = &["direct_full", "struct_full", "direct_empty", "struct_empty"];

    pub fn setup(device: Device) -> Result<Self> {
        let ctx = get_device(device)?;
        let sz_def = kernels::sz_def()?;
        let s0_def = kernels::s0_def()?;
        let values = ParamValues::new(1, device)?;
        let sz = values.packed(&sz_def)?;
        let s0 = StructValue::builder(&s0_def).build()?;
        ctx.synchronize()?;
        Ok(Self {
            kz: kernels::kz()?,
            ksz: kernels::ksz(&sz_def)?,
            k0: kernels::k0()?,
            ks0: kernels::ks0(&s0_def)?,
            flat_args: values.flat_args(),
            sz,
            s0,
            ctx,
        })
    }
}

impl Suite for KernelLaunchParameters {
    fn name(&self) -> &'static str {
        "KernelLaunchParameters"
    }

    fn cases(&self) -> &'static [&'static str] {
        Self::CASES
    }

    fn default_config(&self) -> BenchConfig {
        BenchConfig::new(5_000, 8, 5)
    }

    fn call(&mut self, case: usize) -> Result<()> {
        match case {
            0 => launch(&self.ctx, &self.kz, 1, self.flat_args.clone()).submit(),
            1 => launch(&self.ctx, &self.ksz, 1, vec![self.sz.clone().into()]).submit(),
            2 => launch(&self.ctx, &self.k0, 1, Vec::new()).submit(),
            _ => launch(&self.ctx, &self.ks0, 1, vec![self.s0.clone().into()]).submit(),
        }
    }

    fn synchronize(&self) -> Result<()> {
        self.ctx.synchronize()
    }
}

/// Replay cost of a captured single-launch graph.
pub struct GraphLaunch {
    ctx: Arc<DeviceContext>,
    array: Array,
    stream: Stream,
    graph: Graph,
}

impl GraphLaunch {
    pub const CASES: &'static [&'static str] = &["ten_graph", "ten_graph_on_stream"];

    /// Replays per timed call.
    pub const REPLAYS: usize = 10;

    pub fn setup(device: Device) -> Result<Self> {
        let ctx = get_device(device)?;
        let kernel = kernels::inc_kernel()?;
        let array = Array::zeros(&[N], DType::F32, device)?;
        let stream = Stream::new(&ctx)?;
        let graph = capture(&ctx, |cap| {
            launch(&ctx, &kernel, N, vec![array.clone().into()]).capture(cap).submit()
        })?;
        for _ in 0..5 {
            graph.launch()?;
        }
        ctx.synchronize()?;
        Ok(Self {
            ctx,
            array,
            stream,
            graph,
        })
    }

    pub fn array(&self) -> &Array {
        &self.array
    }
}

impl Suite for GraphLaunch {
    fn name(&self) -> &'static str {
        "GraphLaunch"
    }

    fn cases(&self) -> &'static [&'static str] {
        Self::CASES
    }

    fn default_config(&self) -> BenchConfig {
        BenchConfig::new(5_000, 8, 5)
    }

    fn call(&mut self, case: usize) -> Result<()> {
        for _ in 0..Self::REPLAYS {
            match case {
                0 => self.graph.launch()?,
                _ => self.graph.launch_on(&self.stream)?,
            }
        }
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        self.stream.synchronize()?;
        self.ctx.synchronize()
    }
}

/// Launch the writing flat and struct kernels on identical values and
/// require bit-identical outputs.
pub fn check_param_equivalence(device: Device) -> Result<()> {
    let ctx = get_device(device)?;
    let def = kernels::sz_def()?;
    let flat_vals = ParamValues::new(N, device)?;
    let packed_vals = ParamValues::new(N, device)?;

    launch(&ctx, &kernels::kz_write()?, N, flat_vals.flat_args()).submit()?;
    launch(&ctx, &kernels::ksz_write(&def)?, N, vec![packed_vals.packed(&def)?.into()]).submit()?;
    ctx.synchronize()?;

    for (name, flat, packed) in [
        ("a", &flat_vals.a, &packed_vals.a),
        ("b", &flat_vals.b, &packed_vals.b),
        ("c", &flat_vals.c, &packed_vals.c),
    ] {
        ensure_close(
            &format!("struct vs flat '{name}'"),
            &packed.to_vec_f64(),
            &flat.to_vec_f64(),
            0.0,
            0.0,
        )?;
    }
    tracing::info!(%device, "struct and flat parameters agree");
    Ok(())
}
