//! Reverse pass execution.

use tessel_core::Result;

use crate::adjoint::Adjoint;
use crate::tape::Tape;

/// Run the reverse pass of a closed tape.
///
/// Equivalent to [`Tape::backward`].
pub fn backward(tape: &mut Tape) -> Result<()> {
    tape.backward()
}

/// Apply `entries` last-recorded first, stopping at the first error.
pub(crate) fn reverse(tape_id: usize, entries: &[Box<dyn Adjoint>]) -> Result<()> {
    tracing::debug!(tape = tape_id, ops = entries.len(), "tape backward");
    for (idx, entry) in entries.iter().enumerate().rev() {
        tracing::trace!(tape = tape_id, idx, op = entry.name(), "adjoint");
        entry.apply()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tessel_core::{Array, DType, Device, TesselError};

    #[test]
    fn test_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tape = Tape::new();
        tape.begin().unwrap();
        for name in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            tape.record_fn(name, move || {
                log.lock().push(name);
                Ok(())
            })
            .unwrap();
        }
        tape.close().unwrap();
        backward(&mut tape).unwrap();
        assert_eq!(*log.lock(), vec!["third", "second", "first"]);
    }

    #[test]
    fn test_gradients_accumulate_across_consumers() {
        // y1 = 2x, y2 = 3x; dL/dx = 2·g1 + 3·g2
        let x = Array::zeros(&[2], DType::F64, Device::Cpu).unwrap().with_grad().unwrap();
        let g1 = Array::ones(&[2], DType::F64, Device::Cpu).unwrap();
        let g2 = Array::full(&[2], 10.0, DType::F64, Device::Cpu).unwrap();

        let mut tape = Tape::new();
        tape.begin().unwrap();
        for (scale, seed) in [(2.0, g1.clone()), (3.0, g2.clone())] {
            let x = x.clone();
            tape.record_fn("scale", move || {
                let grad = x.grad_storage().expect("grad attached");
                let seed = seed.to_vec_f64();
                let mut g = grad.write();
                for (i, s) in seed.iter().enumerate() {
                    g.add(i, scale * s);
                }
                Ok(())
            })
            .unwrap();
        }
        tape.close().unwrap();
        tape.backward().unwrap();

        assert_eq!(x.grad().unwrap().to_vec_f64(), vec![32.0, 32.0]);
    }

    #[test]
    fn test_error_stops_reverse_and_consumes() {
        let ran = Arc::new(Mutex::new(false));
        let mut tape = Tape::new();
        tape.begin().unwrap();
        {
            let ran = Arc::clone(&ran);
            tape.record_fn("earlier", move || {
                *ran.lock() = true;
                Ok(())
            })
            .unwrap();
        }
        tape.record_fn("failing", || Err(TesselError::InvalidArgument("boom".into())))
            .unwrap();
        tape.close().unwrap();

        assert!(tape.backward().is_err());
        assert!(!*ran.lock());
        assert!(matches!(tape.backward(), Err(TesselError::TapeConsumed)));
    }
}
