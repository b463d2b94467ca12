use pwm_scope::{DisplayEvent, LoopbackChannel, PwmStore, ScopeCommand};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    info!("Starting PWM scope demo");

    // A software loopback stands in for a physical AO->AI wire.
    let channel = LoopbackChannel::new();
    let store = PwmStore::open_in_memory()?;

    let (control_tx, control_rx) = mpsc::channel(16);
    let (display_tx, mut display_rx) = mpsc::channel(4096);

    let interface_task = tokio::spawn(pwm_scope::scope_interface(
        control_rx,
        display_tx,
        store,
        channel.clone(),
        channel.clone(),
    ));

    // 20 ms period at 50 % duty between 0 V and 5 V, then acquire.
    control_tx
        .send(ScopeCommand::Apply {
            period_ms: 20.0,
            duty_percent: 50.0,
            high_voltage: 5.0,
            low_voltage: 0.0,
        })
        .await?;
    control_tx.send(ScopeCommand::Start).await?;

    info!("Acquiring...");
    sleep(Duration::from_millis(200)).await;
    control_tx.send(ScopeCommand::Capture).await?;
    sleep(Duration::from_millis(20)).await;
    control_tx.send(ScopeCommand::Stop).await?;
    sleep(Duration::from_millis(20)).await;

    let mut continuous_samples = 0;
    let mut last_measurement = None;
    let mut captured_len = None;
    while let Ok(event) = display_rx.try_recv() {
        match event {
            DisplayEvent::ContinuousSample { .. } => continuous_samples += 1,
            DisplayEvent::Measurement(snapshot) => last_measurement = Some(snapshot),
            DisplayEvent::CapturedWaveform(samples) => captured_len = Some(samples.len()),
            DisplayEvent::ClearContinuous => continuous_samples = 0,
        }
    }

    info!("Continuous samples received: {}", continuous_samples);
    if let Some(snapshot) = last_measurement {
        info!(
            "Measured: {:.2} ms period, {:.2} Hz, {:.2} % duty",
            snapshot.period_ms, snapshot.frequency_hz, snapshot.duty_percent
        );
    }
    if let Some(len) = captured_len {
        info!("Captured one period: {} samples", len);
    }

    control_tx.send(ScopeCommand::Reset).await?;
    sleep(Duration::from_millis(20)).await;
    info!("Line voltage after reset: {} V", channel.line_voltage());

    drop(control_tx);
    interface_task.await??;

    info!("PWM scope demo completed");
    Ok(())
}
