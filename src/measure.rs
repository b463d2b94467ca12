use tokio::time::Instant;

/// Default hysteresis band around the configured voltage levels, in volts.
/// Sensor and scale dependent; override with [`EdgeDetector::with_hysteresis`].
pub const DEFAULT_HYSTERESIS: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Rising,
    Falling,
}

#[derive(Debug, Clone, Copy)]
pub struct EdgeEvent {
    pub kind: EdgeKind,
    pub at: Instant,
}

/// Classifies consecutive input samples against hysteresis bands around the
/// configured low/high levels. Stateless; the caller carries the previous
/// sample between ticks.
#[derive(Debug, Clone, Copy)]
pub struct EdgeDetector {
    hysteresis: f64,
}

impl Default for EdgeDetector {
    fn default() -> Self {
        Self {
            hysteresis: DEFAULT_HYSTERESIS,
        }
    }
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hysteresis(hysteresis: f64) -> Self {
        Self { hysteresis }
    }

    /// Rising is checked first, so a degenerate configuration whose bands
    /// overlap resolves to Rising.
    pub fn observe(
        &self,
        previous: f64,
        current: f64,
        low_voltage: f64,
        high_voltage: f64,
        at: Instant,
    ) -> Option<EdgeEvent> {
        let near_low = |voltage: f64| voltage <= low_voltage + self.hysteresis;
        let near_high = |voltage: f64| voltage >= high_voltage - self.hysteresis;

        if near_low(previous) && near_high(current) {
            Some(EdgeEvent {
                kind: EdgeKind::Rising,
                at,
            })
        } else if near_high(previous) && near_low(current) {
            Some(EdgeEvent {
                kind: EdgeKind::Falling,
                at,
            })
        } else {
            None
        }
    }
}

/// Period, frequency and duty cycle measured from the read-back signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementSnapshot {
    pub period_ms: f64,
    pub frequency_hz: f64,
    pub duty_percent: f64,
}

/// Derives timing measurements from detected edges.
///
/// A rising edge closes the running low interval and opens a high interval;
/// a falling edge does the opposite. A snapshot exists once both a high and
/// a low duration have been observed. The two durations may come from
/// different, non-adjacent cycles; the snapshot then mixes cycles. That is
/// the historical behavior of this instrument and is kept on purpose (see
/// the estimator tests).
#[derive(Debug, Default)]
pub struct MeasurementEstimator {
    high_started: Option<Instant>,
    low_started: Option<Instant>,
    high_ms: Option<f64>,
    low_ms: Option<f64>,
}

impl MeasurementEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one detected edge; returns the refreshed snapshot when both
    /// interval durations are known. Durations are overwritten, never
    /// averaged.
    pub fn on_edge(&mut self, edge: &EdgeEvent) -> Option<MeasurementSnapshot> {
        match edge.kind {
            EdgeKind::Rising => {
                if let Some(started) = self.low_started {
                    self.low_ms = Some((edge.at - started).as_secs_f64() * 1000.0);
                }
                self.high_started = Some(edge.at);
            }
            EdgeKind::Falling => {
                if let Some(started) = self.high_started {
                    self.high_ms = Some((edge.at - started).as_secs_f64() * 1000.0);
                }
                self.low_started = Some(edge.at);
            }
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> Option<MeasurementSnapshot> {
        let (high_ms, low_ms) = (self.high_ms?, self.low_ms?);
        let period_ms = high_ms + low_ms;
        Some(MeasurementSnapshot {
            period_ms,
            frequency_hz: 1000.0 / period_ms,
            duty_percent: high_ms / period_ms * 100.0,
        })
    }
}

/// Synthesize one period of the square wave described by a measurement
/// snapshot, stepped at `step_ms` over `[0, period)`. Purely analytic; the
/// live input channel is never read.
pub fn synthesize_period(
    snapshot: &MeasurementSnapshot,
    high_voltage: f64,
    low_voltage: f64,
    step_ms: f64,
) -> Vec<f64> {
    let high_ms = snapshot.period_ms * snapshot.duty_percent / 100.0;
    let mut samples = Vec::new();
    let mut t = 0.0;
    while t < snapshot.period_ms {
        if t < high_ms {
            samples.push(high_voltage);
        } else {
            samples.push(low_voltage);
        }
        t += step_ms;
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    fn ms(base: Instant, offset: u64) -> Instant {
        base + Duration::from_millis(offset)
    }

    #[test]
    fn test_detector_rising_edge() {
        let detector = EdgeDetector::new();
        let edge = detector.observe(0.0, 5.0, 0.0, 5.0, Instant::now()).unwrap();
        assert_eq!(edge.kind, EdgeKind::Rising);
    }

    #[test]
    fn test_detector_falling_edge() {
        let detector = EdgeDetector::new();
        let edge = detector.observe(5.0, 0.0, 0.0, 5.0, Instant::now()).unwrap();
        assert_eq!(edge.kind, EdgeKind::Falling);
    }

    #[test]
    fn test_detector_no_edge_within_band() {
        let detector = EdgeDetector::new();
        assert!(detector.observe(2.0, 2.1, 0.0, 5.0, Instant::now()).is_none());
        assert!(detector.observe(0.0, 0.05, 0.0, 5.0, Instant::now()).is_none());
        assert!(detector.observe(5.0, 4.95, 0.0, 5.0, Instant::now()).is_none());
    }

    #[test]
    fn test_detector_hysteresis_tolerance() {
        let detector = EdgeDetector::new();
        // Still within 0.1 V of the nominal levels on both sides.
        let edge = detector.observe(0.08, 4.92, 0.0, 5.0, Instant::now()).unwrap();
        assert_eq!(edge.kind, EdgeKind::Rising);
        // 0.15 V above the low level is no longer "low".
        assert!(detector.observe(0.15, 5.0, 0.0, 5.0, Instant::now()).is_none());
    }

    #[test]
    fn test_detector_custom_hysteresis() {
        let detector = EdgeDetector::with_hysteresis(0.5);
        let edge = detector.observe(0.4, 4.6, 0.0, 5.0, Instant::now()).unwrap();
        assert_eq!(edge.kind, EdgeKind::Rising);
    }

    #[test]
    fn test_detector_degenerate_bands_prefer_rising() {
        // With high - margin <= low + margin every swing satisfies both
        // predicates; the rising check wins because it runs first.
        let detector = EdgeDetector::with_hysteresis(3.0);
        let edge = detector.observe(2.0, 2.0, 0.0, 4.0, Instant::now()).unwrap();
        assert_eq!(edge.kind, EdgeKind::Rising);
    }

    #[test]
    fn test_estimator_alternating_edges() {
        let base = Instant::now();
        let mut estimator = MeasurementEstimator::new();

        // Falling at t=0, rising at t=10 ms, falling at t=20 ms.
        assert!(estimator
            .on_edge(&EdgeEvent { kind: EdgeKind::Falling, at: ms(base, 0) })
            .is_none());
        assert!(estimator
            .on_edge(&EdgeEvent { kind: EdgeKind::Rising, at: ms(base, 10) })
            .is_none());
        let snapshot = estimator
            .on_edge(&EdgeEvent { kind: EdgeKind::Falling, at: ms(base, 20) })
            .unwrap();

        assert!((snapshot.period_ms - 20.0).abs() < 1e-6);
        assert!((snapshot.frequency_hz - 50.0).abs() < 1e-6);
        assert!((snapshot.duty_percent - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_estimator_requires_both_durations() {
        let base = Instant::now();
        let mut estimator = MeasurementEstimator::new();

        // Two rising edges only give a low duration if a falling edge came
        // between them; a lone rising edge yields nothing.
        assert!(estimator
            .on_edge(&EdgeEvent { kind: EdgeKind::Rising, at: ms(base, 0) })
            .is_none());
        assert!(estimator.snapshot().is_none());
    }

    #[test]
    fn test_estimator_overwrites_on_new_edges() {
        let base = Instant::now();
        let mut estimator = MeasurementEstimator::new();

        estimator.on_edge(&EdgeEvent { kind: EdgeKind::Falling, at: ms(base, 0) });
        estimator.on_edge(&EdgeEvent { kind: EdgeKind::Rising, at: ms(base, 10) });
        estimator.on_edge(&EdgeEvent { kind: EdgeKind::Falling, at: ms(base, 20) });

        // The signal slows down: the next full cycle is 15 ms low, 15 ms high.
        estimator.on_edge(&EdgeEvent { kind: EdgeKind::Rising, at: ms(base, 35) });
        let snapshot = estimator
            .on_edge(&EdgeEvent { kind: EdgeKind::Falling, at: ms(base, 50) })
            .unwrap();

        assert!((snapshot.period_ms - 30.0).abs() < 1e-6);
        assert!((snapshot.duty_percent - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_estimator_pairs_durations_across_cycles() {
        // Known-possibly-buggy derivation, preserved: the high duration and
        // the low duration that form a snapshot can come from non-adjacent
        // cycles, so the reported period mixes cycles when the signal
        // changes between them.
        let base = Instant::now();
        let mut estimator = MeasurementEstimator::new();

        // Cycle one: 10 ms high.
        estimator.on_edge(&EdgeEvent { kind: EdgeKind::Rising, at: ms(base, 0) });
        estimator.on_edge(&EdgeEvent { kind: EdgeKind::Falling, at: ms(base, 10) });
        // A much longer low interval from the following cycle.
        let snapshot = estimator
            .on_edge(&EdgeEvent { kind: EdgeKind::Rising, at: ms(base, 40) })
            .unwrap();

        // 10 ms high from cycle one + 30 ms low from cycle two.
        assert!((snapshot.period_ms - 40.0).abs() < 1e-6);
        assert!((snapshot.duty_percent - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_synthesize_period_quarter_duty() {
        let snapshot = MeasurementSnapshot {
            period_ms: 20.0,
            frequency_hz: 50.0,
            duty_percent: 25.0,
        };

        let samples = synthesize_period(&snapshot, 5.0, 0.0, 1.0);
        assert_eq!(samples.len(), 20);
        assert!(samples[..5].iter().all(|&v| v == 5.0));
        assert!(samples[5..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_synthesize_period_full_and_zero_duty() {
        let all_high = MeasurementSnapshot {
            period_ms: 10.0,
            frequency_hz: 100.0,
            duty_percent: 100.0,
        };
        assert!(synthesize_period(&all_high, 3.3, 0.0, 1.0).iter().all(|&v| v == 3.3));

        let all_low = MeasurementSnapshot {
            period_ms: 10.0,
            frequency_hz: 100.0,
            duty_percent: 0.0,
        };
        assert!(synthesize_period(&all_low, 3.3, 0.0, 1.0).iter().all(|&v| v == 0.0));
    }
}
