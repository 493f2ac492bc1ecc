//! Device context management.
//!
//! Provides lazily initialized singleton `DeviceContext` handles per device.
//! An accelerator context owns a rayon thread pool that launches fan out
//! over, and a default stream that launches without an explicit stream are
//! queued on. The host context runs invocations on the calling thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tessel_core::config::runtime_config;
use tessel_core::device::register_host_sync;
use tessel_core::{memory, Device, Result, TesselError};

use crate::stream::{on_stream_worker, Stream, StreamShared};

/// Global registry of device contexts (one per device).
static DEVICES: OnceLock<Mutex<HashMap<Device, Arc<DeviceContext>>>> = OnceLock::new();

fn devices() -> &'static Mutex<HashMap<Device, Arc<DeviceContext>>> {
    DEVICES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Get or create the context for `device`.
///
/// The context is initialized on first access and cached for reuse.
/// Accelerator ordinals beyond the configured count are rejected.
pub fn get_device(device: Device) -> Result<Arc<DeviceContext>> {
    memory::check_device(device)?;
    register_host_sync(wait_default_stream);
    let mut map = devices().lock();
    if let Some(ctx) = map.get(&device) {
        return Ok(Arc::clone(ctx));
    }
    let ctx = Arc::new(DeviceContext::new(device)?);
    map.insert(device, Arc::clone(&ctx));
    Ok(ctx)
}

/// Check if `device` can be opened.
pub fn is_available(device: Device) -> bool {
    memory::check_device(device).is_ok()
}

/// Number of configured accelerator devices.
pub fn device_count() -> usize {
    runtime_config().accel_devices
}

fn wait_default_stream(device: Device) {
    let ctx = devices().lock().get(&device).cloned();
    if let Some(ctx) = ctx {
        ctx.wait_idle();
    }
}

/// Wait for all outstanding work on every opened device.
pub fn synchronize_all() -> Result<()> {
    let ctxs: Vec<Arc<DeviceContext>> = devices().lock().values().cloned().collect();
    let mut first = None;
    for ctx in ctxs {
        if let Err(e) = ctx.synchronize() {
            first.get_or_insert(e);
        }
    }
    first.map_or(Ok(()), Err)
}

/// Execution resources for one device.
pub struct DeviceContext {
    device: Device,
    pool: Option<rayon::ThreadPool>,
    default_stream: Option<Stream>,
    streams: Mutex<Vec<Weak<StreamShared>>>,
    launches: AtomicU64,
    validate_partitions: bool,
}

impl DeviceContext {
    fn new(device: Device) -> Result<Self> {
        let cfg = runtime_config();
        let (pool, default_stream) = match device {
            Device::Cpu => (None, None),
            Device::Accel(idx) => {
                let mut builder = rayon::ThreadPoolBuilder::new()
                    .thread_name(move |t| format!("tessel-accel{idx}-{t}"));
                if let Some(threads) = cfg.threads_per_device {
                    builder = builder.num_threads(threads);
                }
                let pool = builder.build().map_err(|e| {
                    TesselError::InvalidDevice(format!("{device}: thread pool init failed: {e}"))
                })?;
                (Some(pool), Some(Stream::spawn(device)?))
            }
        };
        tracing::debug!(
            %device,
            threads = pool.as_ref().map_or(1, |p| p.current_num_threads()),
            "device context initialized"
        );
        Ok(Self {
            device,
            pool,
            default_stream,
            streams: Mutex::new(Vec::new()),
            launches: AtomicU64::new(0),
            validate_partitions: cfg.validate_partitions,
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Worker threads invocations are spread across.
    pub fn worker_threads(&self) -> usize {
        self.pool.as_ref().map_or(1, |p| p.current_num_threads())
    }

    /// Whether launches on this device fan out across a thread pool.
    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    /// Total launches executed on this device.
    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }

    pub(crate) fn count_launch(&self) {
        self.launches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn validate_partitions(&self) -> bool {
        self.validate_partitions
    }

    /// Run `f` inside this device's pool.
    pub(crate) fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    /// The stream direct launches are queued on; `None` for the host.
    pub(crate) fn default_stream(&self) -> Option<&Stream> {
        self.default_stream.as_ref()
    }

    /// Wait for the default stream to drain without consuming its error.
    pub(crate) fn wait_idle(&self) {
        if let Some(stream) = &self.default_stream {
            // a job on the worker cannot wait for its own queue
            if !on_stream_worker() {
                stream.shared().wait_idle();
            }
        }
    }

    pub(crate) fn register_stream(&self, stream: Weak<StreamShared>) {
        let mut streams = self.streams.lock();
        streams.retain(|s| s.strong_count() > 0);
        streams.push(stream);
    }

    /// Block until the default stream and every user stream on this device
    /// have drained.
    ///
    /// Returns the first error found. Errors from the default stream are
    /// consumed; errors latched on user streams are reported but left for
    /// the stream's own `synchronize`.
    pub fn synchronize(&self) -> Result<()> {
        let mut first = None;
        if let Some(stream) = &self.default_stream {
            if let Err(e) = stream.synchronize() {
                first.get_or_insert(e);
            }
        }
        let live: Vec<Arc<StreamShared>> = self
            .streams
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for stream in live {
            if let Err(e) = stream.check() {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device", &self.device)
            .field("threads", &self.worker_threads())
            .field("launches", &self.launch_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_is_cached() {
        let a = get_device(Device::Cpu).unwrap();
        let b = get_device(Device::Cpu).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!a.is_parallel());
        assert_eq!(a.worker_threads(), 1);
    }

    #[test]
    fn test_accel_has_pool() {
        let ctx = get_device(Device::Accel(0)).unwrap();
        assert!(ctx.is_parallel());
        assert!(ctx.worker_threads() >= 1);
    }

    #[test]
    fn test_default_stream_only_on_accel() {
        assert!(get_device(Device::Cpu).unwrap().default_stream().is_none());
        let ctx = get_device(Device::Accel(0)).unwrap();
        assert_eq!(ctx.default_stream().map(Stream::device), Some(Device::Accel(0)));
    }

    #[test]
    fn test_synchronize_leaves_user_stream_error() {
        let ctx = get_device(Device::Accel(1)).unwrap();
        let stream = Stream::new(&ctx).unwrap();
        stream
            .enqueue(Box::new(|| Err(TesselError::InvalidArgument("user".into()))))
            .unwrap();
        assert!(ctx.synchronize().is_err());
        // still latched for the stream's owner
        assert!(stream.synchronize().is_err());
        ctx.synchronize().unwrap();
    }

    #[test]
    fn test_invalid_ordinal() {
        let err = get_device(Device::Accel(usize::MAX)).unwrap_err();
        assert!(matches!(err, TesselError::InvalidDevice(_)));
        assert!(!is_available(Device::Accel(usize::MAX)));
    }
}
