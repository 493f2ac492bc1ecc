//! Convenience re-exports for common tessel-core types.
//!
//! ```rust
//! use tessel_core::prelude::*;
//! ```

pub use crate::Array;
pub use crate::DType;
pub use crate::Device;
pub use crate::Result;
pub use crate::TesselError;
pub use crate::Tile;
pub use crate::TileShape;
