//! # tessel-kernels
//!
//! Tile kernels and their execution for Tessel.
//!
//! Provides:
//! - Device contexts (host, and thread-pool accelerators with a default stream) and streams
//! - Kernel definitions with typed parameters and optional adjoints
//! - Launches: direct, on a stream, as reusable commands, or captured into graphs
//! - Elementwise tile maps over differentiable scalar functions
//! - Built-in tile copy and map kernels
//! - Single-tile Cholesky factor-and-solve with a dense reference

pub mod context;
pub mod stream;
pub mod scalar;
pub mod params;
pub mod kernel;
pub mod invocation;
pub mod launch;
pub mod graph;
pub mod tile_ops;
pub mod builtin;
pub mod linalg;

pub use context::{device_count, get_device, is_available, synchronize_all, DeviceContext};
pub use graph::{capture, Capture, Graph};
pub use invocation::Invocation;
pub use kernel::{Kernel, KernelBuilder, ParamConvention};
pub use launch::{launch, LaunchCommand, LaunchDims, LaunchRecord, Tid};
pub use params::{Arg, Args, ParamType, StructDef, StructValue, Vec3};
pub use scalar::{BinaryFunc, Dual, Real, UnaryFunc};
pub use stream::Stream;
