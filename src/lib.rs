mod acquisition;
mod hardware;
mod measure;
mod pwm;
mod store;

// Re-export the main interface function and the types callers wire up
pub use acquisition::{scope_interface, AcqCommand, DisplayEvent};
pub use hardware::{AnalogInput, AnalogOutput, HardwareError, LoopbackChannel};
pub use measure::{
    synthesize_period, EdgeDetector, EdgeEvent, EdgeKind, MeasurementEstimator,
    MeasurementSnapshot, DEFAULT_HYSTERESIS,
};
pub use pwm::{PwmConfig, PwmGenerator};
pub use store::PwmStore;

#[derive(Debug, Clone)]
pub enum ScopeCommand {
    Start,
    Stop,
    Apply {
        period_ms: f64,
        duty_percent: f64,
        high_voltage: f64,
        low_voltage: f64,
    },
    Capture,
    Reset,
}
