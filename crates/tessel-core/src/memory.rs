//! Per-device allocation accounting.
//!
//! Every array allocation reserves its byte size against the owning device.
//! Accelerators are bounded by `memory_limit_bytes` from the runtime config,
//! or by a per-device override. The host is unbounded unless overridden.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::config::runtime_config;
use crate::device::Device;
use crate::error::TesselError;
use crate::Result;

#[derive(Default)]
struct Ledger {
    used: HashMap<Device, usize>,
    limits: HashMap<Device, Option<usize>>,
}

static LEDGER: OnceLock<Mutex<Ledger>> = OnceLock::new();

fn ledger() -> &'static Mutex<Ledger> {
    LEDGER.get_or_init(|| Mutex::new(Ledger::default()))
}

/// Check that `device` names an ordinal the runtime is configured to expose.
pub fn check_device(device: Device) -> Result<()> {
    if let Device::Accel(idx) = device {
        let count = runtime_config().accel_devices;
        if idx >= count {
            return Err(TesselError::InvalidDevice(format!(
                "{device} requested but only {count} accelerator(s) are configured"
            )));
        }
    }
    Ok(())
}

/// Override the allocation limit of one device (`None` removes the bound).
pub fn set_limit(device: Device, limit: Option<usize>) {
    ledger().lock().limits.insert(device, limit);
}

/// Bytes currently reserved on `device`.
pub fn used_bytes(device: Device) -> usize {
    ledger().lock().used.get(&device).copied().unwrap_or(0)
}

fn limit_for(ledger: &Ledger, device: Device) -> Option<usize> {
    match ledger.limits.get(&device) {
        Some(limit) => *limit,
        None if device.is_accel() => runtime_config().memory_limit_bytes,
        None => None,
    }
}

/// Reserve `bytes` on `device`. The reservation is released on drop.
pub fn reserve(device: Device, bytes: usize) -> Result<Reservation> {
    check_device(device)?;
    let mut ledger = ledger().lock();
    let used = ledger.used.get(&device).copied().unwrap_or(0);
    if let Some(limit) = limit_for(&ledger, device) {
        if used + bytes > limit {
            return Err(TesselError::OutOfMemory {
                device,
                requested: bytes,
                available: limit.saturating_sub(used),
                limit,
            });
        }
    }
    ledger.used.insert(device, used + bytes);
    Ok(Reservation { device, bytes })
}

/// Bytes held on a device for the lifetime of a buffer.
#[derive(Debug)]
pub struct Reservation {
    device: Device,
    bytes: usize,
}

impl Reservation {
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut ledger = ledger().lock();
        if let Some(used) = ledger.used.get_mut(&self.device) {
            *used = used.saturating_sub(self.bytes);
        }
    }
}
