use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;

use crate::error::TesselError;
use crate::shape::Shape;
use crate::storage::{BufferData, Storage};
use crate::device::host_sync;
use crate::{DType, Device, Result};

/// A dense 1D or 2D buffer with an optional gradient buffer.
///
/// `Array` is a handle: clones share both the data and the gradient slot,
/// so a gradient seeded through one handle is visible through every other.
///
/// ```
/// use tessel_core::{Array, DType, Device};
///
/// let a = Array::from_f32(&[1.0, 2.0, 3.0, 4.0], &[2, 2], Device::Cpu).unwrap();
/// assert_eq!(a.dims(), &[2, 2]);
/// assert_eq!(a.get(1, 0), 3.0);
/// assert!(!a.has_grad());
/// ```
#[derive(Clone)]
pub struct Array {
    storage: Storage,
    shape: Shape,
    grad: Arc<RwLock<Option<Storage>>>,
}

impl Array {
    // =========================================================================
    // Constructors
    // =========================================================================

    fn from_storage(storage: Storage, shape: Shape) -> Self {
        Self {
            storage,
            shape,
            grad: Arc::new(RwLock::new(None)),
        }
    }

    fn checked_shape(dims: &[usize], len: usize) -> Result<Shape> {
        let shape = Shape::new(dims)?;
        if shape.numel() != len {
            return Err(TesselError::ShapeMismatch {
                expected: dims.to_vec(),
                got: vec![len],
            });
        }
        Ok(shape)
    }

    /// Zero-initialized array.
    pub fn zeros(dims: &[usize], dtype: DType, device: Device) -> Result<Self> {
        let shape = Shape::new(dims)?;
        let storage = Storage::zeros(dtype, shape.numel(), device)?;
        Ok(Self::from_storage(storage, shape))
    }

    /// Array filled with `value`.
    pub fn full(dims: &[usize], value: f64, dtype: DType, device: Device) -> Result<Self> {
        let a = Self::zeros(dims, dtype, device)?;
        a.storage.write().fill(value);
        Ok(a)
    }

    pub fn ones(dims: &[usize], dtype: DType, device: Device) -> Result<Self> {
        Self::full(dims, 1.0, dtype, device)
    }

    /// Copy host f32 data into a new array.
    pub fn from_f32(data: &[f32], dims: &[usize], device: Device) -> Result<Self> {
        let shape = Self::checked_shape(dims, data.len())?;
        Ok(Self::from_storage(Storage::from_f32(data, device)?, shape))
    }

    /// Copy host f64 data into a new array.
    pub fn from_f64(data: &[f64], dims: &[usize], device: Device) -> Result<Self> {
        let shape = Self::checked_shape(dims, data.len())?;
        Ok(Self::from_storage(Storage::from_f64(data, device)?, shape))
    }

    /// Build an array from row-major f64 values, stored at `dtype` precision.
    pub fn from_values(data: &[f64], dims: &[usize], dtype: DType, device: Device) -> Result<Self> {
        let shape = Self::checked_shape(dims, data.len())?;
        let buffer = match dtype {
            DType::F32 => BufferData::F32(data.iter().map(|&v| v as f32).collect()),
            DType::F64 => BufferData::F64(data.to_vec()),
        };
        Ok(Self::from_storage(Storage::from_data(buffer, device)?, shape))
    }

    /// `[0, 1, .., n-1]` reshaped to `dims`.
    pub fn arange(dims: &[usize], dtype: DType, device: Device) -> Result<Self> {
        let n: usize = dims.iter().product();
        let data: Vec<f64> = (0..n).map(|i| i as f64).collect();
        Self::from_values(&data, dims, dtype, device)
    }

    /// Uniform random values in `[0, 1)`.
    pub fn random_uniform<R: Rng + ?Sized>(
        dims: &[usize],
        dtype: DType,
        device: Device,
        rng: &mut R,
    ) -> Result<Self> {
        let n: usize = dims.iter().product();
        let data: Vec<f64> = (0..n).map(|_| rng.gen::<f64>()).collect();
        Self::from_values(&data, dims, dtype, device)
    }

    /// Zeros with this array's shape, dtype and device.
    pub fn zeros_like(&self) -> Result<Self> {
        Self::zeros(self.dims(), self.dtype(), self.device())
    }

    /// Ones with this array's shape, dtype and device.
    pub fn ones_like(&self) -> Result<Self> {
        Self::ones(self.dims(), self.dtype(), self.device())
    }

    /// Deep copy onto `device`. The gradient buffer is not copied.
    pub fn to_device(&self, device: Device) -> Result<Self> {
        host_sync(self.device());
        Ok(Self::from_storage(self.storage.copy_to(device)?, self.shape.clone()))
    }

    /// Attach a zeroed gradient buffer (no-op if one is present).
    pub fn with_grad(self) -> Result<Self> {
        {
            let mut slot = self.grad.write();
            if slot.is_none() {
                *slot = Some(Storage::zeros(self.dtype(), self.numel(), self.device())?);
            }
        }
        Ok(self)
    }

    // =========================================================================
    // Properties
    // =========================================================================

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    pub fn device(&self) -> Device {
        self.storage.device()
    }

    /// Identity of the underlying buffer; clones share it.
    pub fn id(&self) -> u64 {
        self.storage.id()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    // =========================================================================
    // Gradient
    // =========================================================================

    pub fn has_grad(&self) -> bool {
        self.grad.read().is_some()
    }

    /// The gradient buffer viewed as an array (sharing its storage).
    pub fn grad(&self) -> Option<Array> {
        self.grad
            .read()
            .as_ref()
            .map(|g| Self::from_storage(g.clone(), self.shape.clone()))
    }

    /// Raw gradient storage, if any.
    pub fn grad_storage(&self) -> Option<Storage> {
        self.grad.read().clone()
    }

    /// Replace the gradient buffer. `grad` must match shape, dtype and device.
    ///
    /// The new buffer is shared with `grad`, mirroring `a.grad = b` semantics.
    pub fn set_grad(&self, grad: &Array) -> Result<()> {
        if grad.dims() != self.dims() {
            return Err(TesselError::ShapeMismatch {
                expected: self.dims().to_vec(),
                got: grad.dims().to_vec(),
            });
        }
        if grad.dtype() != self.dtype() {
            return Err(TesselError::DTypeMismatch {
                expected: self.dtype(),
                got: grad.dtype(),
            });
        }
        if grad.device() != self.device() {
            return Err(TesselError::DeviceMismatch {
                expected: self.device(),
                got: grad.device(),
            });
        }
        host_sync(self.device());
        *self.grad.write() = Some(grad.storage.clone());
        Ok(())
    }

    /// Zero the gradient buffer in place.
    pub fn zero_grad(&self) {
        host_sync(self.device());
        if let Some(g) = self.grad.read().as_ref() {
            g.write().fill(0.0);
        }
    }

    // =========================================================================
    // Data access
    //
    // Host access to an accelerator array first waits for launches queued on
    // the device's default stream.
    // =========================================================================

    /// Element at `(row, col)` of the matrix view, widened to f64.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let (_, cols) = self.shape.matrix_dims();
        host_sync(self.device());
        self.storage.read().get(row * cols + col)
    }

    pub fn to_vec_f64(&self) -> Vec<f64> {
        host_sync(self.device());
        self.storage.read().to_f64_vec()
    }

    pub fn to_vec_f32(&self) -> Vec<f32> {
        host_sync(self.device());
        self.storage.read().to_f32_vec()
    }

    /// Overwrite every element with `value`.
    pub fn fill(&self, value: f64) {
        host_sync(self.device());
        self.storage.write().fill(value);
    }

    /// Copy `src` into this array. Shapes and dtypes must match.
    pub fn assign(&self, src: &Array) -> Result<()> {
        if src.dims() != self.dims() {
            return Err(TesselError::ShapeMismatch {
                expected: self.dims().to_vec(),
                got: src.dims().to_vec(),
            });
        }
        if self.storage.ptr_eq(&src.storage) {
            return Ok(());
        }
        host_sync(self.device());
        host_sync(src.device());
        let data = src.storage.read().clone();
        if data.dtype() != self.dtype() {
            return Err(TesselError::DTypeMismatch {
                expected: self.dtype(),
                got: data.dtype(),
            });
        }
        *self.storage.write() = data;
        Ok(())
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype())
            .field("device", &self.device())
            .field("grad", &self.has_grad())
            .finish()
    }
}

impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (rows, cols) = self.shape.matrix_dims();
        host_sync(self.device());
        let data = self.storage.read();
        writeln!(f, "[")?;
        for r in 0..rows {
            write!(f, "  [")?;
            for c in 0..cols {
                if c > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:.6}", data.get(r * cols + c))?;
            }
            writeln!(f, "]")?;
        }
        write!(f, "]")
    }
}
