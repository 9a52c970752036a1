//! Audio sinks the engine writes its master mix into.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::{AudioConfig, RepellerError, Result};

/// Destination for rendered mono samples.
pub trait AudioOutput {
    fn name(&self) -> &str;

    /// A suspended output drops whatever is written to it until resumed.
    fn is_suspended(&self) -> bool {
        false
    }

    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, samples: &[f32]);

    fn close(&mut self) {}
}

/// Opens the output graph. Called lazily on the first `start`, so it runs
/// after the user asked for sound; an error leaves the engine stopped and a
/// later `start` tries again.
pub type OutputFactory = Box<dyn FnMut(&AudioConfig) -> Result<Box<dyn AudioOutput>>>;

/// Output that discards everything.
#[derive(Debug, Default)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn name(&self) -> &str {
        "null"
    }

    fn write(&mut self, _samples: &[f32]) {}
}

pub fn null_output() -> OutputFactory {
    Box::new(|_| Ok(Box::new(NullOutput) as Box<dyn AudioOutput>))
}

/// Factory for platforms without a usable output.
pub fn unavailable_output(reason: impl Into<String>) -> OutputFactory {
    let reason = reason.into();
    Box::new(move |_| Err(RepellerError::OutputUnavailable(reason.clone())))
}

/// Shared view over the samples collected by a [`CaptureOutput`].
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    shared: Arc<Mutex<Vec<f32>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    /// Copies the samples captured so far.
    pub fn samples(&self) -> Result<Vec<f32>> {
        Ok(self.lock()?.clone())
    }

    /// Moves the captured samples out, leaving the buffer empty.
    pub fn take(&self) -> Result<Vec<f32>> {
        Ok(std::mem::take(&mut *self.lock()?))
    }

    /// Builds a factory whose outputs append into this buffer.
    pub fn factory(&self) -> OutputFactory {
        let buffer = self.clone();
        Box::new(move |_| Ok(Box::new(CaptureOutput::new(buffer.clone())) as Box<dyn AudioOutput>))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<f32>>> {
        self.shared
            .lock()
            .map_err(|_| RepellerError::msg("capture buffer has been poisoned"))
    }
}

/// Output that records the mix. Like a freshly created browser audio context
/// it starts suspended and has to be resumed before it accepts samples.
#[derive(Debug)]
pub struct CaptureOutput {
    buffer: CaptureBuffer,
    suspended: bool,
}

impl CaptureOutput {
    pub fn new(buffer: CaptureBuffer) -> Self {
        Self {
            buffer,
            suspended: true,
        }
    }
}

impl AudioOutput for CaptureOutput {
    fn name(&self) -> &str {
        "capture"
    }

    fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn resume(&mut self) -> Result<()> {
        self.suspended = false;
        Ok(())
    }

    fn write(&mut self, samples: &[f32]) {
        if self.suspended {
            return;
        }
        match self.buffer.lock() {
            Ok(mut shared) => shared.extend_from_slice(samples),
            Err(err) => tracing::warn!(%err, "dropping captured samples"),
        }
    }

    fn close(&mut self) {
        self.suspended = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_ignores_writes_while_suspended() {
        let buffer = CaptureBuffer::new();
        let mut output = CaptureOutput::new(buffer.clone());

        output.write(&[0.5; 4]);
        assert!(buffer.is_empty().unwrap());

        output.resume().unwrap();
        output.write(&[0.5; 4]);
        assert_eq!(buffer.take().unwrap(), vec![0.5; 4]);
        assert!(buffer.is_empty().unwrap());
    }

    #[test]
    fn unavailable_factory_reports_reason() {
        let mut factory = unavailable_output("no device");
        let err = factory(&AudioConfig::default()).err().unwrap();
        assert!(format!("{err}").contains("no device"));
    }
}
