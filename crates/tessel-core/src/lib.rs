//! # tessel-core
//!
//! Core data model for the Tessel tile runtime.
//!
//! Provides:
//! - `Array`: dense 1D/2D buffers (f32/f64) with optional gradient buffers
//! - `Tile`: immutable rectangular blocks loaded from arrays
//! - `Device`: the host or a data-parallel accelerator ordinal
//! - Per-device memory accounting and process-wide runtime config
//! - `TesselError`, the error type shared by every Tessel crate

pub mod dtype;
pub mod device;
pub mod shape;
pub mod storage;
pub mod array;
pub mod tile;
pub mod compare;
pub mod config;
pub mod memory;
pub mod error;
pub mod prelude;

pub use dtype::DType;
pub use device::Device;
pub use shape::Shape;
pub use storage::{BufferData, Storage};
pub use array::Array;
pub use tile::{Tile, TileRegion, TileShape};
pub use config::RuntimeConfig;
pub use error::TesselError;

pub type Result<T> = std::result::Result<T, TesselError>;
