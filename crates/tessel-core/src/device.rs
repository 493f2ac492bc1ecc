use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::TesselError;

/// Execution device for arrays and kernel launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Device {
    /// Host memory; launches run invocations sequentially on the calling thread.
    #[default]
    Cpu,
    /// Throughput accelerator with ordinal; launches run data-parallel on the
    /// device's worker pool.
    Accel(usize),
}

impl Device {
    /// Whether this is the host device.
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }

    /// Whether this is an accelerator.
    pub fn is_accel(&self) -> bool {
        matches!(self, Device::Accel(_))
    }

    /// Get the accelerator ordinal, if applicable.
    pub fn ordinal(&self) -> Option<usize> {
        match self {
            Device::Accel(idx) => Some(*idx),
            _ => None,
        }
    }
}

static HOST_SYNC: OnceLock<fn(Device)> = OnceLock::new();

/// Install the hook host-side array access uses to wait for work queued on
/// an accelerator. Only the first registration takes effect.
pub fn register_host_sync(hook: fn(Device)) {
    let _ = HOST_SYNC.set(hook);
}

/// Wait until launches already queued on `device` have finished.
///
/// No-op for the host device or when no hook is registered.
pub fn host_sync(device: Device) {
    if device.is_accel() {
        if let Some(hook) = HOST_SYNC.get() {
            hook(device);
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accel(idx) => write!(f, "accel:{idx}"),
        }
    }
}

impl FromStr for Device {
    type Err = TesselError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "cpu" {
            return Ok(Device::Cpu);
        }
        if s == "accel" {
            return Ok(Device::Accel(0));
        }
        let ordinal = s
            .strip_prefix("accel:")
            .and_then(|idx| idx.parse::<usize>().ok())
            .ok_or_else(|| TesselError::InvalidDevice(format!("cannot parse device '{s}'")))?;
        Ok(Device::Accel(ordinal))
    }
}
