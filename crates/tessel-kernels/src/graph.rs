//! Graph capture and replay.
//!
//! While a [`Capture`] is open, launches directed at it are recorded
//! instead of executed. Ending the capture yields a [`Graph`] that replays
//! the recorded launches in order, with their original argument handles,
//! any number of times.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tessel_core::{Device, Result, TesselError};

use crate::context::DeviceContext;
use crate::launch::LaunchCommand;
use crate::stream::Stream;

static NEXT_GRAPH_ID: AtomicUsize = AtomicUsize::new(0);

/// An open recording of launches on one device.
pub struct Capture {
    id: usize,
    ctx: Arc<DeviceContext>,
    ops: Vec<LaunchCommand>,
    open: bool,
}

impl Capture {
    /// Start capturing launches for the device of `ctx`.
    pub fn begin(ctx: &Arc<DeviceContext>) -> Self {
        let id = NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(graph = id, device = %ctx.device(), "capture begin");
        Self {
            id,
            ctx: Arc::clone(ctx),
            ops: Vec::new(),
            open: true,
        }
    }

    pub fn device(&self) -> Device {
        self.ctx.device()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Launches recorded so far.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn push(&mut self, cmd: LaunchCommand) -> Result<()> {
        if !self.open {
            return Err(TesselError::CaptureClosed);
        }
        let device = cmd.context().device();
        if device != self.ctx.device() {
            return Err(TesselError::DeviceMismatch {
                expected: self.ctx.device(),
                got: device,
            });
        }
        tracing::trace!(graph = self.id, kernel = cmd.kernel().name(), "captured launch");
        self.ops.push(cmd);
        Ok(())
    }

    /// Append an already recorded command.
    pub fn push_cmd(&mut self, cmd: &LaunchCommand) -> Result<()> {
        self.push(cmd.clone())
    }

    /// Close the capture and return the replayable graph.
    ///
    /// A capture ends once; later calls fail with `CaptureClosed`.
    pub fn end(&mut self) -> Result<Graph> {
        if !self.open {
            return Err(TesselError::CaptureClosed);
        }
        self.open = false;
        let ops: Arc<[LaunchCommand]> = std::mem::take(&mut self.ops).into();
        tracing::debug!(graph = self.id, ops = ops.len(), "capture end");
        Ok(Graph {
            id: self.id,
            ctx: Arc::clone(&self.ctx),
            ops,
        })
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        if self.open && !self.ops.is_empty() {
            tracing::warn!(
                graph = self.id,
                ops = self.ops.len(),
                "capture dropped without end; recorded launches discarded"
            );
        }
    }
}

/// Capture the launches `f` directs at the capture into a graph.
///
/// The capture is ended on every exit path; an error from `f` is returned
/// in preference to the graph.
pub fn capture<F>(ctx: &Arc<DeviceContext>, f: F) -> Result<Graph>
where
    F: FnOnce(&mut Capture) -> Result<()>,
{
    let mut cap = Capture::begin(ctx);
    let out = f(&mut cap);
    let graph = cap.end();
    out?;
    graph
}

/// An immutable, replayable sequence of launches.
#[derive(Clone)]
pub struct Graph {
    id: usize,
    ctx: Arc<DeviceContext>,
    ops: Arc<[LaunchCommand]>,
}

impl Graph {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn device(&self) -> Device {
        self.ctx.device()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Replay every captured launch in capture order: as one job on the
    /// default stream of an accelerator, in place on the host device.
    pub fn launch(&self) -> Result<()> {
        match self.ctx.default_stream() {
            Some(stream) => self.launch_on(stream),
            None => self.run(),
        }
    }

    fn run(&self) -> Result<()> {
        tracing::trace!(graph = self.id, ops = self.ops.len(), "graph launch");
        for op in self.ops.iter() {
            op.run()?;
        }
        Ok(())
    }

    /// Queue one replay of the graph on `stream`.
    pub fn launch_on(&self, stream: &Stream) -> Result<()> {
        if stream.device() != self.ctx.device() {
            return Err(TesselError::DeviceMismatch {
                expected: self.ctx.device(),
                got: stream.device(),
            });
        }
        let graph = self.clone();
        stream.enqueue(Box::new(move || graph.run()))
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kernels: Vec<&str> = self.ops.iter().map(|op| op.kernel().name()).collect();
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("device", &self.ctx.device())
            .field("ops", &kernels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::get_device;
    use crate::kernel::Kernel;
    use crate::launch::launch;
    use crate::params::ParamType;
    use tessel_core::{Array, DType};

    fn inc() -> Kernel {
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
    fn test_capture_defers_execution() {
        let ctx = get_device(Device::Cpu).unwrap();
        let a = Array::zeros(&[8], DType::F32, Device::Cpu).unwrap();
        let kernel = inc();
        let graph = capture(&ctx, |cap| {
            for _ in 0..3 {
                launch(&ctx, &kernel, 8, vec![a.clone().into()]).capture(cap).submit()?;
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(a.to_vec_f64(), vec![0.0; 8]);

        graph.launch().unwrap();
        graph.launch().unwrap();
        assert_eq!(a.to_vec_f64(), vec![6.0; 8]);
    }

    #[test]
    fn test_end_twice() {
        let ctx = get_device(Device::Cpu).unwrap();
        let mut cap = Capture::begin(&ctx);
        cap.end().unwrap();
        assert!(matches!(cap.end(), Err(TesselError::CaptureClosed)));

        let a = Array::zeros(&[1], DType::F32, Device::Cpu).unwrap();
        let err = launch(&ctx, &inc(), 1, vec![a.into()]).capture(&mut cap).submit().unwrap_err();
        assert!(matches!(err, TesselError::CaptureClosed));
    }

    #[test]
    fn test_error_inside_capture_still_ends() {
        let ctx = get_device(Device::Cpu).unwrap();
        let err = capture(&ctx, |_| Err(TesselError::InvalidArgument("body failed".into()))).unwrap_err();
        assert!(matches!(err, TesselError::InvalidArgument(_)));
    }

    #[test]
    fn test_accel_replay_is_one_queued_job() {
        let ctx = get_device(Device::Accel(0)).unwrap();
        let a = Array::zeros(&[32], DType::F32, Device::Accel(0)).unwrap();
        let kernel = inc();
        let graph = capture(&ctx, |cap| {
            for _ in 0..10 {
                launch(&ctx, &kernel, 32, vec![a.clone().into()]).capture(cap).submit()?;
            }
            Ok(())
        })
        .unwrap();
        let stream = ctx.default_stream().unwrap();
        let before = stream.completed();
        graph.launch().unwrap();
        graph.launch().unwrap();
        assert_eq!(a.to_vec_f64(), vec![20.0; 32]);
        assert!(stream.completed() >= before + 2);
        ctx.synchronize().unwrap();
    }

    #[test]
    fn test_replay_on_stream() {
        let ctx = get_device(Device::Accel(0)).unwrap();
        let stream = Stream::new(&ctx).unwrap();
        let a = Array::zeros(&[16], DType::F32, Device::Accel(0)).unwrap();
        let cmd = launch(&ctx, &inc(), 16, vec![a.clone().into()]).record_cmd().unwrap();
        let mut cap = Capture::begin(&ctx);
        cap.push_cmd(&cmd).unwrap();
        cap.push_cmd(&cmd).unwrap();
        let graph = cap.end().unwrap();
        for _ in 0..5 {
            graph.launch_on(&stream).unwrap();
        }
        stream.synchronize().unwrap();
        assert_eq!(a.to_vec_f64(), vec![10.0; 16]);
    }
}
