use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("analog output write failed: {0}")]
    Write(String),
    #[error("analog input read failed: {0}")]
    Read(String),
    #[error("channel is disconnected")]
    Disconnected,
}

impl<T> From<PoisonError<T>> for HardwareError {
    fn from(_: PoisonError<T>) -> Self {
        HardwareError::Disconnected
    }
}

/// One single-sample analog output channel. Each write drives the physical
/// line to the given voltage and holds it there until the next write.
pub trait AnalogOutput {
    fn write_sample(&mut self, voltage: f64) -> Result<(), HardwareError>;
}

/// One single-sample analog input channel.
pub trait AnalogInput {
    fn read_sample(&mut self) -> Result<f64, HardwareError>;
}

/// Software loopback: the input channel reads back whatever was last written
/// to the output channel. Stands in for a physical AO->AI wire in tests and
/// the demo; the line starts at 0 V.
#[derive(Debug, Clone, Default)]
pub struct LoopbackChannel {
    line: Arc<Mutex<f64>>,
}

impl LoopbackChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current line voltage, for assertions.
    pub fn line_voltage(&self) -> f64 {
        *self.line.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AnalogOutput for LoopbackChannel {
    fn write_sample(&mut self, voltage: f64) -> Result<(), HardwareError> {
        let mut line = self.line.lock()?;
        *line = voltage;
        Ok(())
    }
}

impl AnalogInput for LoopbackChannel {
    fn read_sample(&mut self) -> Result<f64, HardwareError> {
        let line = self.line.lock()?;
        Ok(*line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_starts_at_zero() {
        let mut channel = LoopbackChannel::new();
        assert_eq!(channel.read_sample().unwrap(), 0.0);
    }

    #[test]
    fn test_loopback_echoes_last_write() {
        let channel = LoopbackChannel::new();
        let mut output = channel.clone();
        let mut input = channel.clone();

        output.write_sample(5.0).unwrap();
        assert_eq!(input.read_sample().unwrap(), 5.0);
        assert_eq!(channel.line_voltage(), 5.0);

        output.write_sample(0.0).unwrap();
        assert_eq!(input.read_sample().unwrap(), 0.0);
    }

    #[test]
    fn test_loopback_holds_between_reads() {
        let channel = LoopbackChannel::new();
        let mut output = channel.clone();
        let mut input = channel.clone();

        output.write_sample(3.3).unwrap();
        assert_eq!(input.read_sample().unwrap(), 3.3);
        assert_eq!(input.read_sample().unwrap(), 3.3);
    }
}
