//! The tape: an ordered record of launches for the reverse pass.
//!
//! A tape moves through `Idle → Recording → Recorded → Consumed`; every
//! operation checks the current state and fails with a typed error otherwise.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use tessel_core::{Result, TesselError};

use crate::adjoint::{Adjoint, FnAdjoint};

static NEXT_TAPE_ID: AtomicUsize = AtomicUsize::new(0);

fn next_id() -> usize {
    NEXT_TAPE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle of a tape: `Idle → Recording → Recorded → Consumed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapeState {
    Idle,
    Recording,
    Recorded,
    Consumed,
}

impl TapeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TapeState::Idle => "idle",
            TapeState::Recording => "recording",
            TapeState::Recorded => "recorded",
            TapeState::Consumed => "consumed",
        }
    }
}

impl fmt::Display for TapeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of launches issued inside a scope, replayed in reverse by
/// [`Tape::backward`].
///
/// The tape owns only the launch records (kernel handles and argument
/// handles), never array data. Gradient buffers live on the arrays.
pub struct Tape {
    id: usize,
    state: TapeState,
    entries: Vec<Box<dyn Adjoint>>,
}

impl Tape {
    /// A new tape in the `Idle` state.
    pub fn new() -> Self {
        Self {
            id: next_id(),
            state: TapeState::Idle,
            entries: Vec::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> TapeState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == TapeState::Recording
    }

    /// Number of recorded operations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of recorded operations in recording order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name()).collect()
    }

    fn expect(&self, expected: TapeState) -> Result<()> {
        if self.state == TapeState::Consumed && expected != TapeState::Consumed {
            return Err(TesselError::TapeConsumed);
        }
        if self.state != expected {
            return Err(TesselError::InvalidTapeState {
                expected: expected.as_str(),
                found: self.state.as_str(),
            });
        }
        Ok(())
    }

    /// Start intercepting launches: `Idle → Recording`.
    pub fn begin(&mut self) -> Result<()> {
        self.expect(TapeState::Idle)?;
        self.state = TapeState::Recording;
        tracing::debug!(tape = self.id, "tape recording");
        Ok(())
    }

    /// Append one operation. Only valid while recording.
    pub fn record(&mut self, entry: Box<dyn Adjoint>) -> Result<()> {
        self.expect(TapeState::Recording)?;
        tracing::trace!(tape = self.id, op = entry.name(), "tape record");
        self.entries.push(entry);
        Ok(())
    }

    /// Record a host-side operation whose reverse is the closure `f`.
    pub fn record_fn<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.record(Box::new(FnAdjoint::new(name, f)))
    }

    /// Finalize the record: `Recording → Recorded`.
    pub fn close(&mut self) -> Result<()> {
        self.expect(TapeState::Recording)?;
        self.state = TapeState::Recorded;
        tracing::debug!(tape = self.id, ops = self.entries.len(), "tape closed");
        Ok(())
    }

    /// Run the reverse pass: `Recorded → Consumed`.
    ///
    /// Output gradients must be seeded by the caller beforehand. A tape can be
    /// consumed once; a second call fails with [`TesselError::TapeConsumed`].
    pub fn backward(&mut self) -> Result<()> {
        self.expect(TapeState::Recorded)?;
        // Consumed even if an adjoint fails: partial gradients are not replayable.
        self.state = TapeState::Consumed;
        crate::backward::reverse(self.id, &self.entries)
    }
}

impl Default for Tape {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Tape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tape")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("ops", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        let mut tape = Tape::new();
        assert_eq!(tape.state(), TapeState::Idle);
        tape.begin().unwrap();
        assert!(tape.is_recording());
        tape.record_fn("noop", || Ok(())).unwrap();
        tape.close().unwrap();
        assert_eq!(tape.state(), TapeState::Recorded);
        tape.backward().unwrap();
        assert_eq!(tape.state(), TapeState::Consumed);
    }

    #[test]
    fn test_record_requires_recording() {
        let mut tape = Tape::new();
        let err = tape.record_fn("early", || Ok(())).unwrap_err();
        assert!(matches!(err, TesselError::InvalidTapeState { expected: "recording", found: "idle" }));

        tape.begin().unwrap();
        tape.close().unwrap();
        let err = tape.record_fn("late", || Ok(())).unwrap_err();
        assert!(matches!(err, TesselError::InvalidTapeState { found: "recorded", .. }));
        assert!(tape.is_empty());
    }

    #[test]
    fn test_backward_before_close() {
        let mut tape = Tape::new();
        tape.begin().unwrap();
        assert!(matches!(tape.backward(), Err(TesselError::InvalidTapeState { .. })));
    }

    #[test]
    fn test_double_backward() {
        let mut tape = Tape::new();
        tape.begin().unwrap();
        tape.close().unwrap();
        tape.backward().unwrap();
        assert!(matches!(tape.backward(), Err(TesselError::TapeConsumed)));
        assert!(matches!(tape.begin(), Err(TesselError::TapeConsumed)));
    }

    #[test]
    fn test_double_begin() {
        let mut tape = Tape::new();
        tape.begin().unwrap();
        assert!(matches!(tape.begin(), Err(TesselError::InvalidTapeState { .. })));
    }
}
