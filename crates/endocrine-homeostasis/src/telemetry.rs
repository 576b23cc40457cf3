//! Prometheus metrics for the control loop

use endocrine_common::{SignalType, MAX_LEVEL};
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

/// Controller metrics
#[derive(Clone)]
pub struct ControllerMetrics {
    pub events_processed: IntCounter,
    pub signals_accepted: IntCounter,
    pub signals_rejected: IntCounterVec,
    pub emergency_triggers: IntCounter,
    pub emergency_active: IntGauge,
    pub oscillations: IntCounterVec,
    pub transform_failures: IntCounter,
    pub hormone_level: GaugeVec,
    pub process_duration_seconds: Histogram,
    registry: Registry,
}

impl ControllerMetrics {
    /// Create metrics registered on a private registry
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered on the given registry
    pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let metrics = Self {
            events_processed: IntCounter::new(
                "endocrine_events_processed_total",
                "Total domain events processed",
            )?,
            signals_accepted: IntCounter::new(
                "endocrine_signals_accepted_total",
                "Regulated signals accepted onto the bus",
            )?,
            signals_rejected: IntCounterVec::new(
                Opts::new(
                    "endocrine_signals_rejected_total",
                    "Regulated signals dropped, by reason",
                ),
                &["reason"],
            )?,
            emergency_triggers: IntCounter::new(
                "endocrine_emergency_triggers_total",
                "Emergency threshold crossings",
            )?,
            emergency_active: IntGauge::new(
                "endocrine_emergency_active",
                "1 while emergency override is in force",
            )?,
            oscillations: IntCounterVec::new(
                Opts::new(
                    "endocrine_oscillations_total",
                    "Oscillation verdicts, by signal type",
                ),
                &["signal_type"],
            )?,
            transform_failures: IntCounter::new(
                "endocrine_transform_failures_total",
                "Modulation rules that failed to evaluate",
            )?,
            hormone_level: GaugeVec::new(
                Opts::new("endocrine_hormone_level", "Current hormone level"),
                &["signal_type"],
            )?,
            process_duration_seconds: Histogram::with_opts(
                HistogramOpts::new(
                    "endocrine_process_event_duration_seconds",
                    "process_event latency",
                )
                .buckets(vec![0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01]),
            )?,
            registry,
        };
        metrics.register()?;
        Ok(metrics)
    }

    fn register(&self) -> prometheus::Result<()> {
        let registry = &self.registry;
        registry.register(Box::new(self.events_processed.clone()))?;
        registry.register(Box::new(self.signals_accepted.clone()))?;
        registry.register(Box::new(self.signals_rejected.clone()))?;
        registry.register(Box::new(self.emergency_triggers.clone()))?;
        registry.register(Box::new(self.emergency_active.clone()))?;
        registry.register(Box::new(self.oscillations.clone()))?;
        registry.register(Box::new(self.transform_failures.clone()))?;
        registry.register(Box::new(self.hormone_level.clone()))?;
        registry.register(Box::new(self.process_duration_seconds.clone()))?;
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Publish the hormone level table
    pub fn record_levels(&self, levels: &[f64; SignalType::COUNT]) {
        for signal_type in SignalType::ALL {
            self.hormone_level
                .with_label_values(&[signal_type.as_str()])
                .set(levels[signal_type.index()].min(MAX_LEVEL));
        }
    }

    pub fn record_rejected(&self, reason: &str) {
        self.signals_rejected.with_label_values(&[reason]).inc();
    }

    pub fn record_oscillation(&self, signal_type: SignalType) {
        self.oscillations
            .with_label_values(&[signal_type.as_str()])
            .inc();
    }

    pub fn set_emergency(&self, active: bool) {
        self.emergency_active.set(i64::from(active));
    }

    /// Text exposition of every registered metric
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_render() {
        let metrics = ControllerMetrics::new().unwrap();
        metrics.events_processed.inc();
        metrics.record_rejected("cooldown");
        metrics.record_oscillation(SignalType::Stress);
        metrics.set_emergency(true);

        let mut levels = [0.0; SignalType::COUNT];
        levels[SignalType::Alarm.index()] = 0.8;
        metrics.record_levels(&levels);

        let text = metrics.gather_text();
        assert!(text.contains("endocrine_events_processed_total 1"));
        assert!(text.contains("reason=\"cooldown\""));
        assert!(text.contains("endocrine_emergency_active 1"));
        assert!(text.contains("signal_type=\"ALARM\""));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        let _first = ControllerMetrics::with_registry(registry.clone()).unwrap();
        assert!(ControllerMetrics::with_registry(registry).is_err());
    }
}
