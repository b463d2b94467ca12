use anyhow::{anyhow, Result};
use tokio::time::Duration;
use tracing::error;

#[derive(Debug, Clone)]
pub struct PwmConfig {
    frequency: f64,    // Hz
    duty_cycle: f64,   // percent, 0-100
    high_voltage: f64, // V when the signal is high
    low_voltage: f64,  // V when the signal is low
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            frequency: 50.0,
            duty_cycle: 50.0,
            high_voltage: 5.0,
            low_voltage: 0.0,
        }
    }
}

impl PwmConfig {
    pub fn new(frequency: f64, duty_cycle: f64, high_voltage: f64, low_voltage: f64) -> Result<Self> {
        if !frequency.is_finite() || frequency <= 0.0 {
            error!("frequency must be a positive number, got {}", frequency);
            return Err(anyhow!("frequency must be a positive number, got {}", frequency));
        }
        if !duty_cycle.is_finite() || !(0.0..=100.0).contains(&duty_cycle) {
            error!("duty cycle must be between 0 and 100 percent, got {}", duty_cycle);
            return Err(anyhow!("duty cycle must be between 0 and 100 percent, got {}", duty_cycle));
        }
        if !high_voltage.is_finite() || !low_voltage.is_finite() {
            error!("voltage levels must be finite, got high={} low={}", high_voltage, low_voltage);
            return Err(anyhow!("voltage levels must be finite, got high={} low={}", high_voltage, low_voltage));
        }
        // The derived period must be representable, or phase bookkeeping
        // would panic later instead of failing at apply time.
        if Duration::try_from_secs_f64(1.0 / frequency).is_err() {
            error!("period of {} s at {} Hz is too long to represent", 1.0 / frequency, frequency);
            return Err(anyhow!("period of {} s at {} Hz is too long to represent", 1.0 / frequency, frequency));
        }
        Ok(Self {
            frequency,
            duty_cycle,
            high_voltage,
            low_voltage,
        })
    }

    /// The front panel enters the period in milliseconds; frequency is its
    /// reciprocal.
    pub fn from_period_ms(period_ms: f64, duty_cycle: f64, high_voltage: f64, low_voltage: f64) -> Result<Self> {
        if !period_ms.is_finite() || period_ms <= 0.0 {
            error!("period must be a positive number of milliseconds, got {}", period_ms);
            return Err(anyhow!("period must be a positive number of milliseconds, got {}", period_ms));
        }
        Self::new(1000.0 / period_ms, duty_cycle, high_voltage, low_voltage)
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn duty_cycle(&self) -> f64 {
        self.duty_cycle
    }

    pub fn high_voltage(&self) -> f64 {
        self.high_voltage
    }

    pub fn low_voltage(&self) -> f64 {
        self.low_voltage
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frequency)
    }

    pub fn high_time(&self) -> Duration {
        Duration::from_secs_f64((1.0 / self.frequency) * (self.duty_cycle / 100.0))
    }

    pub fn low_time(&self) -> Duration {
        self.period() - self.high_time()
    }
}

/// Software-timed square wave generator. Phase bookkeeping only; the caller
/// owns the clock and writes the emitted voltage to the output channel.
#[derive(Debug)]
pub struct PwmGenerator {
    config: PwmConfig,
    high_time: Duration,
    low_time: Duration,
    state_high: bool,
    elapsed: Duration,
}

impl PwmGenerator {
    pub fn new(config: PwmConfig) -> Self {
        let mut generator = Self {
            high_time: Duration::ZERO,
            low_time: Duration::ZERO,
            state_high: true,
            elapsed: Duration::ZERO,
            config,
        };
        generator.reset_phase();
        generator
    }

    /// Swap in a new configuration and restart the cycle from the beginning
    /// of the high phase. All derived state is replaced in one step.
    pub fn configure(&mut self, config: PwmConfig) {
        self.config = config;
        self.reset_phase();
    }

    fn reset_phase(&mut self) {
        self.high_time = self.config.high_time();
        self.low_time = self.config.low_time();
        self.state_high = true;
        self.elapsed = Duration::ZERO;
    }

    /// Accumulate `delta` of wall-clock time into the current phase and
    /// return the voltage to drive when a phase boundary is crossed.
    ///
    /// At most one transition is evaluated per call: with a delta longer
    /// than a full period the generator lags behind the nominal waveform
    /// rather than catching up, which is how a software-timed PWM on a busy
    /// host actually behaves.
    pub fn advance(&mut self, delta: Duration) -> Option<f64> {
        self.elapsed += delta;

        if self.state_high && self.elapsed >= self.high_time {
            self.state_high = false;
            self.elapsed = Duration::ZERO;
            Some(self.config.low_voltage)
        } else if !self.state_high && self.elapsed >= self.low_time {
            self.state_high = true;
            self.elapsed = Duration::ZERO;
            Some(self.config.high_voltage)
        } else {
            None
        }
    }

    pub fn is_high(&self) -> bool {
        self.state_high
    }

    pub fn elapsed_in_phase(&self) -> Duration {
        self.elapsed
    }

    pub fn config(&self) -> &PwmConfig {
        &self.config
    }
}
