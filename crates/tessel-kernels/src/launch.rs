//! Kernel launches.
//!
//! A launch runs a kernel body once per index of a 1-3 dimensional domain.
//! The same launch can be issued directly, queued on a [`Stream`], captured
//! into a graph, or recorded as a reusable [`LaunchCommand`].
//!
//! On an accelerator a direct launch is queued on the device's default
//! stream and returns before the kernel runs; host reads of the array wait
//! for it, and errors raised while running surface from
//! `DeviceContext::synchronize`. On the host device launches run to
//! completion before returning.
//!
//! # Example
//! ```
//! use tessel_core::{Array, DType, Device};
//! use tessel_kernels::{builtin, get_device, launch};
//!
//! let ctx = get_device(Device::Cpu).unwrap();
//! let kernel = builtin::tile_copy(2, 2, DType::F32).unwrap();
//! let a = Array::arange(&[4, 4], DType::F32, Device::Cpu).unwrap();
//! let b = Array::zeros(&[4, 4], DType::F32, Device::Cpu).unwrap();
//! launch(&ctx, &kernel, (2, 2), vec![a.clone().into(), b.clone().into()])
//!     .submit()
//!     .unwrap();
//! assert_eq!(a.to_vec_f64(), b.to_vec_f64());
//! ```

use std::sync::Arc;

use rayon::prelude::*;
use tessel_autograd::{Adjoint, Tape, TapeState};
use tessel_core::{Result, TesselError};

use crate::context::DeviceContext;
use crate::graph::Capture;
use crate::invocation::{Invocation, LaunchState};
use crate::kernel::Kernel;
use crate::params::{Arg, Args};
use crate::stream::{Stream, StreamShared};

/// Index of one invocation within its launch domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tid {
    pub i: usize,
    pub j: usize,
    pub k: usize,
}

/// Launch domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaunchDims {
    D1(usize),
    D2(usize, usize),
    D3(usize, usize, usize),
}

impl LaunchDims {
    /// Number of invocations, rejecting domains past the index range.
    pub fn total(&self) -> Result<usize> {
        let total = match *self {
            LaunchDims::D1(a) => Some(a),
            LaunchDims::D2(a, b) => a.checked_mul(b),
            LaunchDims::D3(a, b, c) => a.checked_mul(b).and_then(|ab| ab.checked_mul(c)),
        };
        match total {
            Some(n) if n < u32::MAX as usize => Ok(n),
            _ => Err(TesselError::InvalidArgument(format!(
                "launch domain {self:?} exceeds the index range"
            ))),
        }
    }

    pub fn ndim(&self) -> usize {
        match self {
            LaunchDims::D1(_) => 1,
            LaunchDims::D2(..) => 2,
            LaunchDims::D3(..) => 3,
        }
    }

    /// Row-major decomposition of a linear invocation index.
    #[inline]
    pub fn tid(&self, linear: usize) -> Tid {
        match *self {
            LaunchDims::D1(_) => Tid { i: linear, j: 0, k: 0 },
            LaunchDims::D2(_, b) => Tid {
                i: linear / b,
                j: linear % b,
                k: 0,
            },
            LaunchDims::D3(_, b, c) => Tid {
                i: linear / (b * c),
                j: (linear / c) % b,
                k: linear % c,
            },
        }
    }
}

impl From<usize> for LaunchDims {
    fn from(n: usize) -> Self {
        LaunchDims::D1(n)
    }
}

impl From<(usize, usize)> for LaunchDims {
    fn from((a, b): (usize, usize)) -> Self {
        LaunchDims::D2(a, b)
    }
}

impl From<(usize, usize, usize)> for LaunchDims {
    fn from((a, b, c): (usize, usize, usize)) -> Self {
        LaunchDims::D3(a, b, c)
    }
}

impl From<[usize; 2]> for LaunchDims {
    fn from([a, b]: [usize; 2]) -> Self {
        LaunchDims::D2(a, b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pass {
    Forward,
    Adjoint,
}

/// Run every invocation of `kernel` over `dims` on `ctx`, on the calling
/// thread.
///
/// The host device runs invocations in order; an accelerator fans them out
/// across its pool. Either way, the call returns once every invocation has
/// finished.
pub(crate) fn execute(
    ctx: &DeviceContext,
    kernel: &Kernel,
    dims: LaunchDims,
    args: &Args,
    pass: Pass,
) -> Result<()> {
    let body = match pass {
        Pass::Forward => kernel.forward_fn(),
        Pass::Adjoint => kernel.adjoint_fn()?,
    };
    let total = dims.total()?;
    ctx.count_launch();
    if total == 0 {
        return Ok(());
    }
    tracing::trace!(kernel = kernel.name(), ?dims, ?pass, device = %ctx.device(), "execute");

    let state = LaunchState::new(ctx.validate_partitions());
    let run = |linear: usize| body(&Invocation::new(dims.tid(linear), linear as u32, &state), args);
    if ctx.is_parallel() {
        ctx.install(|| (0..total).into_par_iter().try_for_each(run))
    } else {
        (0..total).try_for_each(run)
    }
}

/// Begin a launch of `kernel` over `dims` with `args`.
pub fn launch<'a>(
    ctx: &'a Arc<DeviceContext>,
    kernel: &'a Kernel,
    dims: impl Into<LaunchDims>,
    args: Vec<Arg>,
) -> LaunchBuilder<'a> {
    LaunchBuilder {
        ctx,
        kernel,
        dims: dims.into(),
        args,
        dispatch: Dispatch::Direct,
        tape: None,
    }
}

enum Dispatch<'a> {
    Direct,
    Stream(&'a Stream),
    Capture(&'a mut Capture),
}

/// A launch being configured. Finish with [`submit`](Self::submit) or
/// [`record_cmd`](Self::record_cmd).
pub struct LaunchBuilder<'a> {
    ctx: &'a Arc<DeviceContext>,
    kernel: &'a Kernel,
    dims: LaunchDims,
    args: Vec<Arg>,
    dispatch: Dispatch<'a>,
    tape: Option<&'a mut Tape>,
}

impl<'a> LaunchBuilder<'a> {
    /// Queue on `stream` instead of the device's default stream.
    pub fn stream(mut self, stream: &'a Stream) -> Self {
        self.dispatch = Dispatch::Stream(stream);
        self
    }

    /// Append to an open graph capture instead of running.
    pub fn capture(mut self, capture: &'a mut Capture) -> Self {
        self.dispatch = Dispatch::Capture(capture);
        self
    }

    /// Record the launch on `tape` for the reverse pass.
    pub fn tape(mut self, tape: &'a mut Tape) -> Self {
        self.tape = Some(tape);
        self
    }

    fn check_tape(&self) -> Result<()> {
        if let Some(tape) = self.tape.as_deref() {
            match tape.state() {
                TapeState::Recording => {}
                TapeState::Consumed => return Err(TesselError::TapeConsumed),
                other => {
                    return Err(TesselError::InvalidTapeState {
                        expected: TapeState::Recording.as_str(),
                        found: other.as_str(),
                    })
                }
            }
            if !self.kernel.has_adjoint() {
                return Err(TesselError::NoAdjoint(self.kernel.name().to_string()));
            }
            if matches!(self.dispatch, Dispatch::Capture(_)) {
                return Err(TesselError::InvalidArgument(
                    "captured launches cannot be recorded on a tape".into(),
                ));
            }
        }
        Ok(())
    }

    /// Validate, marshal and issue the launch.
    pub fn submit(self) -> Result<()> {
        self.check_tape()?;
        self.dims.total()?;
        let args = self.kernel.marshal(self.args, self.ctx.device())?;
        let cmd = LaunchCommand {
            ctx: Arc::clone(self.ctx),
            kernel: self.kernel.clone(),
            dims: self.dims,
            args,
        };
        let queue = match self.dispatch {
            Dispatch::Direct => {
                cmd.launch()?;
                self.ctx.default_stream()
            }
            Dispatch::Stream(stream) => {
                cmd.launch_on(stream)?;
                Some(stream)
            }
            Dispatch::Capture(capture) => return capture.push(cmd),
        };
        if let Some(tape) = self.tape {
            tape.record(Box::new(LaunchRecord {
                cmd,
                queue: queue.map(Stream::shared),
            }))?;
        }
        Ok(())
    }

    /// Validate and marshal once, returning a command that can be launched
    /// repeatedly without revalidation.
    pub fn record_cmd(self) -> Result<LaunchCommand> {
        if self.tape.is_some() || !matches!(self.dispatch, Dispatch::Direct) {
            return Err(TesselError::InvalidArgument(
                "record_cmd takes no stream, capture or tape; pass them when launching the command".into(),
            ));
        }
        self.dims.total()?;
        let args = self.kernel.marshal(self.args, self.ctx.device())?;
        Ok(LaunchCommand {
            ctx: Arc::clone(self.ctx),
            kernel: self.kernel.clone(),
            dims: self.dims,
            args,
        })
    }
}

/// A fully marshaled launch that can be issued many times.
#[derive(Clone)]
pub struct LaunchCommand {
    ctx: Arc<DeviceContext>,
    kernel: Kernel,
    dims: LaunchDims,
    args: Args,
}

impl LaunchCommand {
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn dims(&self) -> LaunchDims {
        self.dims
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }

    /// Issue the launch: queued on the default stream of an accelerator,
    /// run in place on the host device.
    pub fn launch(&self) -> Result<()> {
        match self.ctx.default_stream() {
            Some(stream) => self.launch_on(stream),
            None => self.run(),
        }
    }

    /// Run the forward body to completion on the calling thread.
    pub(crate) fn run(&self) -> Result<()> {
        execute(&self.ctx, &self.kernel, self.dims, &self.args, Pass::Forward)
    }

    /// Queue on `stream`.
    pub fn launch_on(&self, stream: &Stream) -> Result<()> {
        if stream.device() != self.ctx.device() {
            return Err(TesselError::DeviceMismatch {
                expected: self.ctx.device(),
                got: stream.device(),
            });
        }
        let cmd = self.clone();
        stream.enqueue(Box::new(move || cmd.run()))
    }

    /// Replace argument `idx`, validating it against the kernel parameter.
    pub fn set_arg(&mut self, idx: usize, arg: impl Into<Arg>) -> Result<()> {
        let arg = arg.into();
        self.kernel.check_arg(idx, &arg, self.ctx.device())?;
        self.args.set(idx, arg)
    }
}

impl std::fmt::Debug for LaunchCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchCommand")
            .field("kernel", &self.kernel.name())
            .field("dims", &self.dims)
            .field("device", &self.ctx.device())
            .field("args", &self.args)
            .finish()
    }
}

/// A launch as recorded on a tape: replays the kernel's adjoint with the
/// argument handles of the forward launch.
///
/// Before the adjoint runs, the stream the forward launch was queued on is
/// drained. Other streams are left alone, and an error latched on the
/// forward stream stays there for its owner.
pub struct LaunchRecord {
    cmd: LaunchCommand,
    queue: Option<Arc<StreamShared>>,
}

impl Adjoint for LaunchRecord {
    fn apply(&self) -> Result<()> {
        if let Some(queue) = &self.queue {
            queue.wait_idle();
        }
        execute(&self.cmd.ctx, &self.cmd.kernel, self.cmd.dims, &self.cmd.args, Pass::Adjoint)
    }

    fn name(&self) -> &str {
        self.cmd.kernel.name()
    }
}
