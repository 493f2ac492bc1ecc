use crate::device::Device;
use crate::dtype::DType;

/// Errors raised by arrays, tiles, launches and sessions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TesselError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("DType mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    #[error("Kernel '{kernel}' expects {expected} arguments, got {got}")]
    ArgumentCount { kernel: String, expected: usize, got: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Tile {extent:?} at origin {origin:?} exceeds array of shape {array:?}")]
    TileOutOfBounds {
        array: Vec<usize>,
        origin: (usize, usize),
        extent: (usize, usize),
    },

    #[error("Element ({row}, {col}) stored by invocations {first} and {second} of one launch")]
    OverlappingStore { row: usize, col: usize, first: u32, second: u32 },

    #[error("Tape is {found}, expected {expected}")]
    InvalidTapeState { expected: &'static str, found: &'static str },

    #[error("Tape has already been consumed by a backward pass")]
    TapeConsumed,

    #[error("Kernel '{0}' has no adjoint and cannot be recorded")]
    NoAdjoint(String),

    #[error("Graph capture already ended")]
    CaptureClosed,

    #[error("Numerical check '{what}' failed: max error {max_err:e} exceeds tolerance {tol:e}")]
    ToleranceExceeded { what: String, max_err: f64, tol: f64 },

    #[error("Matrix is not positive definite (pivot {pivot})")]
    NotPositiveDefinite { pivot: usize },

    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    #[error("Device mismatch: expected {expected}, got {got}")]
    DeviceMismatch { expected: Device, got: Device },

    #[error("Out of memory on {device}: requested {requested} bytes, {available} of {limit} available")]
    OutOfMemory {
        device: Device,
        requested: usize,
        available: usize,
        limit: usize,
    },

    #[error("Stream on {0} is closed")]
    StreamClosed(Device),

    #[error("Configuration error: {0}")]
    Config(String),
}
