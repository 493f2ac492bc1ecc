use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::memory::{self, Reservation};
use crate::{DType, Device, Result};

static NEXT_STORAGE_ID: AtomicU64 = AtomicU64::new(0);

fn next_id() -> u64 {
    NEXT_STORAGE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Typed element buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferData {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl BufferData {
    fn zeros(dtype: DType, numel: usize) -> Self {
        match dtype {
            DType::F32 => BufferData::F32(vec![0.0; numel]),
            DType::F64 => BufferData::F64(vec![0.0; numel]),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            BufferData::F32(_) => DType::F32,
            BufferData::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BufferData::F32(v) => v.len(),
            BufferData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read element `idx` widened to f64.
    #[inline]
    pub fn get(&self, idx: usize) -> f64 {
        match self {
            BufferData::F32(v) => v[idx] as f64,
            BufferData::F64(v) => v[idx],
        }
    }

    /// Write element `idx`, rounding to the buffer's precision.
    #[inline]
    pub fn set(&mut self, idx: usize, value: f64) {
        match self {
            BufferData::F32(v) => v[idx] = value as f32,
            BufferData::F64(v) => v[idx] = value,
        }
    }

    /// Add into element `idx`.
    #[inline]
    pub fn add(&mut self, idx: usize, value: f64) {
        match self {
            BufferData::F32(v) => v[idx] += value as f32,
            BufferData::F64(v) => v[idx] += value,
        }
    }

    pub fn fill(&mut self, value: f64) {
        match self {
            BufferData::F32(v) => v.fill(value as f32),
            BufferData::F64(v) => v.fill(value),
        }
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            BufferData::F32(v) => v.iter().map(|&x| x as f64).collect(),
            BufferData::F64(v) => v.clone(),
        }
    }

    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            BufferData::F32(v) => v.clone(),
            BufferData::F64(v) => v.iter().map(|&x| x as f32).collect(),
        }
    }
}

struct StorageInner {
    id: u64,
    device: Device,
    data: RwLock<BufferData>,
    _reservation: Reservation,
}

/// Shared, reference-counted, device-tagged element buffer.
///
/// Cloning shares the buffer. Writers take the interior write lock, so disjoint
/// tile stores from concurrent invocations serialize per store, not per launch.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

impl Storage {
    /// Allocate zeroed storage for `numel` elements on `device`.
    pub fn zeros(dtype: DType, numel: usize, device: Device) -> Result<Self> {
        Self::from_data(BufferData::zeros(dtype, numel), device)
    }

    /// Take ownership of an existing buffer.
    pub fn from_data(data: BufferData, device: Device) -> Result<Self> {
        let reservation = memory::reserve(device, data.dtype().storage_bytes(data.len()))?;
        Ok(Self {
            inner: Arc::new(StorageInner {
                id: next_id(),
                device,
                data: RwLock::new(data),
                _reservation: reservation,
            }),
        })
    }

    pub fn from_f32(data: &[f32], device: Device) -> Result<Self> {
        Self::from_data(BufferData::F32(data.to_vec()), device)
    }

    pub fn from_f64(data: &[f64], device: Device) -> Result<Self> {
        Self::from_data(BufferData::F64(data.to_vec()), device)
    }

    /// Unique identity of the underlying buffer (shared by clones).
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn dtype(&self) -> DType {
        self.inner.data.read().dtype()
    }

    pub fn device(&self) -> Device {
        self.inner.device
    }

    pub fn numel(&self) -> usize {
        self.inner.data.read().len()
    }

    pub fn nbytes(&self) -> usize {
        let data = self.inner.data.read();
        data.dtype().storage_bytes(data.len())
    }

    pub fn read(&self) -> RwLockReadGuard<'_, BufferData> {
        self.inner.data.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, BufferData> {
        self.inner.data.write()
    }

    /// Deep copy onto `device`.
    pub fn copy_to(&self, device: Device) -> Result<Self> {
        let data = self.read().clone();
        Self::from_data(data, device)
    }

    /// Whether two handles share one buffer.
    pub fn ptr_eq(&self, other: &Storage) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.read();
        f.debug_struct("Storage")
            .field("id", &self.inner.id)
            .field("dtype", &data.dtype())
            .field("device", &self.inner.device)
            .field("numel", &data.len())
            .finish()
    }
}
