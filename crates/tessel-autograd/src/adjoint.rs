//! Adjoint trait: the reverse-pass half of a recorded operation.

use tessel_core::Result;

/// Reverse-pass computation of one recorded operation.
///
/// Each recorded launch implements this trait to define how output
/// gradients flow back into its inputs' gradient buffers. Contributions
/// are added, never assigned, so an array read by several recorded
/// operations ends up with the sum of every consumer's gradient.
pub trait Adjoint: Send + Sync {
    /// Propagate output gradients into input gradient accumulators.
    fn apply(&self) -> Result<()>;

    /// Name of the recorded operation (for debugging).
    fn name(&self) -> &str;
}

/// Adjoint backed by a closure, for host-side operations recorded by hand.
pub struct FnAdjoint<F> {
    name: String,
    f: F,
}

impl<F> FnAdjoint<F>
where
    F: Fn() -> Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> Adjoint for FnAdjoint<F>
where
    F: Fn() -> Result<()> + Send + Sync,
{
    fn apply(&self) -> Result<()> {
        (self.f)()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
