use anyhow::{anyhow, Result};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::watch;
use tokio::time::{interval_at, Duration, Instant};
use tracing::{error, info, warn};

use crate::hardware::{AnalogInput, AnalogOutput, HardwareError};
use crate::measure::{synthesize_period, EdgeDetector, MeasurementEstimator, MeasurementSnapshot};
use crate::pwm::{PwmConfig, PwmGenerator};
use crate::store::PwmStore;
use crate::ScopeCommand;

/// Time step used when synthesizing the captured single-period waveform, ms.
const CAPTURE_STEP_MS: f64 = 1.0;

/// Commands understood by the acquisition task itself.
#[derive(Debug, Clone)]
pub enum AcqCommand {
    Start,
    Stop,
    Configure(PwmConfig),
    Reset,
}

/// Events the acquisition side posts to the display inbox. The consumer
/// drains these on whatever thread owns the display state.
#[derive(Debug, Clone)]
pub enum DisplayEvent {
    ContinuousSample { voltage: f64, delta: Duration },
    Measurement(MeasurementSnapshot),
    CapturedWaveform(Vec<f64>),
    ClearContinuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Stopped,
    Running,
}

/// The acquisition state machine: drives the PWM output, samples the input,
/// detects edges and publishes measurements. Sole owner of all per-tick
/// mutable state; the outside world talks to it through channels only.
struct AcquisitionLoop<O, I> {
    output: O,
    input: I,
    generator: PwmGenerator,
    detector: EdgeDetector,
    estimator: MeasurementEstimator,
    state: LoopState,
    previous_voltage: f64,
    last_tick: Instant,
    command_rx: Receiver<AcqCommand>,
    display_tx: Sender<DisplayEvent>,
    snapshot_tx: watch::Sender<Option<MeasurementSnapshot>>,
}

impl<O: AnalogOutput, I: AnalogInput> AcquisitionLoop<O, I> {
    fn new(
        output: O,
        input: I,
        command_rx: Receiver<AcqCommand>,
        display_tx: Sender<DisplayEvent>,
        snapshot_tx: watch::Sender<Option<MeasurementSnapshot>>,
    ) -> Self {
        Self {
            output,
            input,
            generator: PwmGenerator::new(PwmConfig::default()),
            detector: EdgeDetector::new(),
            estimator: MeasurementEstimator::new(),
            state: LoopState::Stopped,
            previous_voltage: 0.0,
            last_tick: Instant::now(),
            command_rx,
            display_tx,
            snapshot_tx,
        }
    }

    async fn run(&mut self) {
        let tick = Duration::from_millis(1);
        let mut ticker = interval_at(Instant::now() + tick, tick);

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(AcqCommand::Start) => self.start(),
                        Some(AcqCommand::Stop) => {
                            self.state = LoopState::Stopped;
                            info!("acquisition stopped");
                        },
                        Some(AcqCommand::Configure(config)) => {
                            info!("PWM configured: {} Hz at {} %", config.frequency(), config.duty_cycle());
                            self.generator.configure(config);
                        },
                        Some(AcqCommand::Reset) => {
                            if let Err(e) = self.reset().await {
                                error!("reset failed: {}", e);
                            }
                        },
                        None => break, // all command senders dropped
                    }
                },
                _ = ticker.tick() => {
                    if self.state == LoopState::Running {
                        if let Err(e) = self.tick().await {
                            error!("hardware I/O failed, stopping acquisition: {}", e);
                            self.state = LoopState::Stopped;
                        }
                    }
                }
            }
        }
        info!("acquisition task completed");
    }

    fn start(&mut self) {
        // Each run measures from scratch; stale intervals from a previous
        // run must not leak into the first snapshot.
        self.estimator = MeasurementEstimator::new();
        self.last_tick = Instant::now();
        self.state = LoopState::Running;
        info!("acquisition started");
    }

    async fn reset(&mut self) -> Result<(), HardwareError> {
        self.state = LoopState::Stopped;
        self.output.write_sample(0.0)?;
        if let Err(e) = self.display_tx.send(DisplayEvent::ClearContinuous).await {
            warn!("failed to publish display clear: {}", e);
        }
        info!("acquisition reset, output forced to 0 V");
        Ok(())
    }

    /// One acquisition tick. A hardware failure aborts the tick and is
    /// fatal to the current run.
    async fn tick(&mut self) -> Result<(), HardwareError> {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;

        if let Some(voltage) = self.generator.advance(delta) {
            self.output.write_sample(voltage)?;
        }

        let voltage = self.input.read_sample()?;

        let low = self.generator.config().low_voltage();
        let high = self.generator.config().high_voltage();
        if let Some(edge) = self.detector.observe(self.previous_voltage, voltage, low, high, now) {
            if let Some(snapshot) = self.estimator.on_edge(&edge) {
                if self.snapshot_tx.send(Some(snapshot)).is_err() {
                    warn!("snapshot receiver dropped");
                }
                if let Err(e) = self.display_tx.send(DisplayEvent::Measurement(snapshot)).await {
                    warn!("failed to publish measurement: {}", e);
                }
            }
        }
        self.previous_voltage = voltage;

        // Display latency feeds straight back into acquisition cadence here;
        // the inbox consumer is expected to drain promptly.
        if let Err(e) = self.display_tx.send(DisplayEvent::ContinuousSample { voltage, delta }).await {
            warn!("failed to publish continuous sample: {}", e);
        }
        Ok(())
    }
}

/// Wires the acquisition task to the user-facing command stream: translates
/// [`ScopeCommand`]s, owns the apply-sequence counter and performs the
/// persistence writes, so the tick loop itself never touches the store.
pub async fn scope_interface<O, I>(
    mut control_rx: Receiver<ScopeCommand>,
    display_tx: Sender<DisplayEvent>,
    store: PwmStore,
    output: O,
    input: I,
) -> Result<(), anyhow::Error>
where
    O: AnalogOutput + Send + 'static,
    I: AnalogInput + Send + 'static,
{
    let (acq_command_tx, acq_command_rx) = tokio::sync::mpsc::channel::<AcqCommand>(4);
    let (snapshot_tx, snapshot_rx) = watch::channel::<Option<MeasurementSnapshot>>(None);

    let mut acquisition = AcquisitionLoop::new(output, input, acq_command_rx, display_tx.clone(), snapshot_tx);
    let acquisition_task = tokio::spawn(async move { acquisition.run().await });

    let control_task = tokio::spawn(async move {
        info!("scope control task started");
        let mut applied = PwmConfig::default();
        let mut apply_seq: i64 = 0;

        while let Some(command) = control_rx.recv().await {
            match command {
                ScopeCommand::Start => {
                    if let Err(e) = acq_command_tx.send(AcqCommand::Start).await {
                        error!("failed to send Start command: {}", e);
                    }
                },
                ScopeCommand::Stop => {
                    if let Err(e) = acq_command_tx.send(AcqCommand::Stop).await {
                        error!("failed to send Stop command: {}", e);
                    }
                },
                ScopeCommand::Reset => {
                    if let Err(e) = acq_command_tx.send(AcqCommand::Reset).await {
                        error!("failed to send Reset command: {}", e);
                    }
                },
                ScopeCommand::Apply { period_ms, duty_percent, high_voltage, low_voltage } => {
                    let config = match PwmConfig::from_period_ms(period_ms, duty_percent, high_voltage, low_voltage) {
                        Ok(config) => config,
                        Err(e) => {
                            error!("rejected parameter update: {}", e);
                            continue;
                        }
                    };
                    apply_seq += 1;
                    if let Err(e) = store.insert_set_record(
                        period_ms,
                        config.frequency(),
                        config.high_voltage(),
                        config.duty_cycle(),
                        apply_seq,
                    ) {
                        error!("failed to persist set record: {:#}", e);
                    }
                    if let Err(e) = acq_command_tx.send(AcqCommand::Configure(config.clone())).await {
                        error!("failed to send Configure command: {}", e);
                    }
                    applied = config;
                    info!("parameters applied: {} Hz at {} % (seq {})", applied.frequency(), applied.duty_cycle(), apply_seq);
                },
                ScopeCommand::Capture => {
                    let snapshot = *snapshot_rx.borrow();
                    let Some(snapshot) = snapshot else {
                        warn!("no measurement available yet, capture ignored");
                        continue;
                    };
                    let samples = synthesize_period(
                        &snapshot,
                        applied.high_voltage(),
                        applied.low_voltage(),
                        CAPTURE_STEP_MS,
                    );
                    match store.latest_set_record_id() {
                        Ok(Some(set_id)) => {
                            if let Err(e) = store.insert_derived_record(
                                snapshot.period_ms,
                                snapshot.frequency_hz,
                                applied.high_voltage(),
                                snapshot.duty_percent,
                                set_id,
                                apply_seq,
                            ) {
                                error!("failed to persist derived record: {:#}", e);
                            }
                        },
                        Ok(None) => warn!("no set record to reference, capture not persisted"),
                        Err(e) => error!("failed to look up latest set record: {:#}", e),
                    }
                    if let Err(e) = display_tx.send(DisplayEvent::CapturedWaveform(samples)).await {
                        warn!("failed to publish captured waveform: {}", e);
                    }
                    info!("captured one period: {:.2} ms at {:.2} %", snapshot.period_ms, snapshot.duty_percent);
                },
            }
        }
        info!("scope control task completed");
    });

    let acquisition_result = acquisition_task.await;
    let control_result = control_task.await;
    if acquisition_result.is_err() {
        error!("acquisition task failed: {:?}", acquisition_result);
        return Err(anyhow!("acquisition task failed: {:?}", acquisition_result));
    }
    if control_result.is_err() {
        error!("control task failed: {:?}", control_result);
        return Err(anyhow!("control task failed: {:?}", control_result));
    }
    info!("scope interface tasks completed");
    Ok(())
}
