//! Streams: ordered asynchronous work queues bound to one device.
//!
//! Each stream owns a worker thread that drains its queue in submission
//! order. Errors raised by queued work are latched and surface from the
//! next `synchronize` on that stream.

use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tessel_core::{Device, Result, TesselError};

use crate::context::DeviceContext;

pub(crate) type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

static NEXT_STREAM_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static ON_STREAM_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is a stream worker.
pub(crate) fn on_stream_worker() -> bool {
    ON_STREAM_WORKER.with(Cell::get)
}

struct Queue {
    jobs: VecDeque<Job>,
    busy: bool,
    closed: bool,
    error: Option<TesselError>,
    completed: u64,
}

pub(crate) struct StreamShared {
    queue: Mutex<Queue>,
    work: Condvar,
    idle: Condvar,
}

impl StreamShared {
    fn new() -> Self {
        Self {
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                busy: false,
                closed: false,
                error: None,
                completed: 0,
            }),
            work: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    /// Block until the queue is empty and the worker is idle, then take the
    /// latched error.
    pub(crate) fn synchronize(&self) -> Result<()> {
        let mut q = self.queue.lock();
        while !q.jobs.is_empty() || q.busy {
            self.idle.wait(&mut q);
        }
        match q.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Block until the queue is empty and the worker is idle. The latched
    /// error, if any, stays in place.
    pub(crate) fn wait_idle(&self) {
        let mut q = self.queue.lock();
        while !q.jobs.is_empty() || q.busy {
            self.idle.wait(&mut q);
        }
    }

    /// Drain, then report the latched error without clearing it.
    pub(crate) fn check(&self) -> Result<()> {
        self.wait_idle();
        match &self.queue.lock().error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn worker_loop(&self, id: usize) {
        ON_STREAM_WORKER.with(|flag| flag.set(true));
        loop {
            let job = {
                let mut q = self.queue.lock();
                while q.jobs.is_empty() && !q.closed {
                    self.work.wait(&mut q);
                }
                match q.jobs.pop_front() {
                    Some(job) => {
                        q.busy = true;
                        job
                    }
                    None => break,
                }
            };

            let result = std::panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|_| {
                Err(TesselError::InvalidArgument(format!("work on stream {id} panicked")))
            });

            let mut q = self.queue.lock();
            q.busy = false;
            q.completed += 1;
            if let Err(e) = result {
                tracing::debug!(stream = id, error = %e, "stream work failed");
                if q.error.is_none() {
                    q.error = Some(e);
                }
            }
            if q.jobs.is_empty() {
                self.idle.notify_all();
            }
        }
        tracing::trace!(stream = id, "stream worker exiting");
    }
}

/// An ordered queue of work on one device.
///
/// Work submitted to the same stream runs in submission order; the submitter
/// continues immediately. Dropping a stream drains its queue first.
pub struct Stream {
    id: usize,
    device: Device,
    shared: Arc<StreamShared>,
    worker: Option<JoinHandle<()>>,
}

impl Stream {
    /// Create a stream on the device of `ctx`.
    pub fn new(ctx: &Arc<DeviceContext>) -> Result<Self> {
        let stream = Self::spawn(ctx.device())?;
        ctx.register_stream(Arc::downgrade(&stream.shared));
        Ok(stream)
    }

    /// Start a stream worker without registering it with a context.
    pub(crate) fn spawn(device: Device) -> Result<Self> {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(StreamShared::new());
        let worker = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(format!("tessel-stream-{id}"))
                .spawn(move || shared.worker_loop(id))
                .map_err(|e| TesselError::InvalidDevice(format!("{device}: stream worker spawn failed: {e}")))?
        };
        tracing::debug!(stream = id, %device, "stream created");
        Ok(Self {
            id,
            device,
            shared,
            worker: Some(worker),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Work queued but not yet finished.
    pub fn pending(&self) -> usize {
        let q = self.shared.queue.lock();
        q.jobs.len() + usize::from(q.busy)
    }

    /// Work items finished since the stream was created.
    pub fn completed(&self) -> u64 {
        self.shared.queue.lock().completed
    }

    pub(crate) fn shared(&self) -> Arc<StreamShared> {
        Arc::clone(&self.shared)
    }

    pub(crate) fn enqueue(&self, job: Job) -> Result<()> {
        let mut q = self.shared.queue.lock();
        if q.closed {
            return Err(TesselError::StreamClosed(self.device));
        }
        q.jobs.push_back(job);
        self.shared.work.notify_one();
        Ok(())
    }

    /// Wait for all queued work; returns the first error raised since the
    /// previous synchronize.
    pub fn synchronize(&self) -> Result<()> {
        self.shared.synchronize()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        {
            let mut q = self.shared.queue.lock();
            q.closed = true;
            self.shared.work.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!(stream = self.id, "stream worker panicked");
            }
        }
        if let Some(e) = self.shared.queue.lock().error.take() {
            tracing::warn!(stream = self.id, error = %e, "stream dropped with unobserved error");
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::get_device;
    use std::time::Duration;

    #[test]
    fn test_runs_in_submission_order() {
        let ctx = get_device(Device::Cpu).unwrap();
        let stream = Stream::new(&ctx).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..16 {
            let log = Arc::clone(&log);
            stream
                .enqueue(Box::new(move || {
                    if i == 0 {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    log.lock().push(i);
                    Ok(())
                }))
                .unwrap();
        }
        stream.synchronize().unwrap();
        assert_eq!(*log.lock(), (0..16).collect::<Vec<_>>());
        assert_eq!(stream.completed(), 16);
        assert_eq!(stream.pending(), 0);
    }

    #[test]
    fn test_error_latched_until_synchronize() {
        let ctx = get_device(Device::Cpu).unwrap();
        let stream = Stream::new(&ctx).unwrap();
        stream
            .enqueue(Box::new(|| Err(TesselError::InvalidArgument("first".into()))))
            .unwrap();
        stream
            .enqueue(Box::new(|| Err(TesselError::InvalidArgument("second".into()))))
            .unwrap();
        match stream.synchronize() {
            Err(TesselError::InvalidArgument(msg)) => assert_eq!(msg, "first"),
            other => panic!("unexpected {other:?}"),
        }
        stream.synchronize().unwrap();
    }

    #[test]
    fn test_check_keeps_error_latched() {
        let ctx = get_device(Device::Cpu).unwrap();
        let stream = Stream::new(&ctx).unwrap();
        stream
            .enqueue(Box::new(|| Err(TesselError::InvalidArgument("kept".into()))))
            .unwrap();
        assert!(stream.shared().check().is_err());
        assert!(stream.shared().check().is_err());
        assert!(stream.synchronize().is_err());
        stream.shared().check().unwrap();
    }

    #[test]
    fn test_worker_flag() {
        let ctx = get_device(Device::Cpu).unwrap();
        let stream = Stream::new(&ctx).unwrap();
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        stream
            .enqueue(Box::new(move || {
                *slot.lock() = Some(on_stream_worker());
                Ok(())
            }))
            .unwrap();
        stream.synchronize().unwrap();
        assert_eq!(*seen.lock(), Some(true));
        assert!(!on_stream_worker());
    }

    #[test]
    fn test_drop_drains_queue() {
        let ctx = get_device(Device::Cpu).unwrap();
        let hits = Arc::new(Mutex::new(0));
        {
            let stream = Stream::new(&ctx).unwrap();
            for _ in 0..8 {
                let hits = Arc::clone(&hits);
                stream
                    .enqueue(Box::new(move || {
                        *hits.lock() += 1;
                        Ok(())
                    }))
                    .unwrap();
            }
        }
        assert_eq!(*hits.lock(), 8);
    }
}
