//! Scoped recording.

use tessel_core::Result;

use crate::tape::Tape;

/// Open a tape, run `f` against it and close it on every exit path.
///
/// The tape is returned even when `f` fails, already closed, so the caller
/// decides whether a partial record is still worth a backward pass.
///
/// # Example
/// ```
/// use tessel_autograd::scope::record;
///
/// let (mut tape, out) = record(|tape| {
///     tape.record_fn("noop", || Ok(()))?;
///     Ok(42)
/// });
/// assert_eq!(out.unwrap(), 42);
/// tape.backward().unwrap();
/// ```
pub fn record<T, F>(f: F) -> (Tape, Result<T>)
where
    F: FnOnce(&mut Tape) -> Result<T>,
{
    let mut tape = Tape::new();
    if let Err(e) = tape.begin() {
        return (tape, Err(e));
    }
    let out = f(&mut tape);
    let closed = tape.close();
    match (out, closed) {
        (Ok(v), Ok(())) => (tape, Ok(v)),
        (Err(e), _) | (Ok(_), Err(e)) => (tape, Err(e)),
    }
}
