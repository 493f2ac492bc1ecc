//! # tessel-autograd
//!
//! Differentiable execution sessions for Tessel.
//!
//! Provides a tape-based reverse pass with:
//! - `Adjoint` trait for the reverse half of recorded launches
//! - `Tape` with an explicit `Idle → Recording → Recorded → Consumed` lifecycle
//! - Reverse-order replay with additive gradient accumulation
//! - `scope::record` for close-on-every-exit recording

pub mod adjoint;
pub mod tape;
pub mod backward;
pub mod scope;

pub use adjoint::{Adjoint, FnAdjoint};
pub use tape::{Tape, TapeState};
pub use backward::backward;
