//! Tiled linear algebra.
//!
//! - `tile`: Cholesky factorization and triangular solves on one tile
//! - `reference`: dense f64 routines (on `faer`) the tile results are checked against
//! - `example`: the single-tile factor-and-solve driver

pub mod example;
pub mod reference;
pub mod tile;

pub use example::{cholesky_kernel, CholeskyExample, CholeskyReport, MAX_CHOLESKY_TILE};
