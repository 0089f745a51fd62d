use std::ops::Range;

use crate::{AudioBuffer, Result};

/// Sink that renders audio for a session. The engine never reads timing back
/// from it; position is estimated from the wall clock.
pub trait AudioOutput: Send + Sync {
    /// Begins rendering `buffer[range]`. Any previous rendering is replaced.
    fn start(&self, buffer: &AudioBuffer, range: Range<usize>) -> Result<()>;

    fn halt(&self);
}

/// Output that discards audio. Used for headless runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentOutput;

impl AudioOutput for SilentOutput {
    fn start(&self, buffer: &AudioBuffer, range: Range<usize>) -> Result<()> {
        tracing::trace!(
            start = range.start,
            end = range.end,
            sample_rate = buffer.sample_rate(),
            "silent output started"
        );
        Ok(())
    }

    fn halt(&self) {}
}
