//! Oscillation detection
//!
//! Keeps a fixed-capacity sliding window of `(timestamp, level)` samples per
//! signal type. A type oscillates when consecutive samples keep crossing the
//! window mean *and* the window has real spread: a noisy but flat signal is
//! not an unstable feedback loop.

use std::collections::VecDeque;

use endocrine_common::{clamp_unit, Signal, SignalType};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Deviations smaller than this count as sitting on the mean
const MEAN_EPSILON: f64 = 1e-9;

/// Oscillation detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Samples retained per signal type
    pub window_size: usize,
    /// Samples required before a verdict can be positive
    pub min_samples: usize,
    /// Mean-crossing rate (crossings per step) that must be exceeded
    pub crossing_rate_threshold: f64,
    /// Sample variance that must be exceeded
    pub min_variance: f64,
    /// Damping multiplier while oscillating
    pub oscillating_damping: f64,
    /// Damping multiplier otherwise
    pub stable_damping: f64,
    /// Samples older than this are dropped by `prune_older_than`
    pub max_sample_age_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            min_samples: 6,
            crossing_rate_threshold: 0.5,
            min_variance: 0.02,
            oscillating_damping: 0.3,
            stable_damping: 0.8,
            max_sample_age_ms: 60_000,
        }
    }
}

/// One observation in a window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: i64,
    pub level: f64,
}

/// Window statistics for one signal type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OscillationReport {
    pub signal_type: SignalType,
    pub samples: usize,
    pub mean: f64,
    pub variance: f64,
    pub crossing_rate: f64,
    pub oscillating: bool,
}

/// Per-type sliding-window oscillation detector
#[derive(Debug, Clone)]
pub struct OscillationDetector {
    config: DetectorConfig,
    windows: [VecDeque<Sample>; SignalType::COUNT],
}

impl OscillationDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let mut config = config;
        config.window_size = config.window_size.max(2);
        config.min_samples = config.min_samples.clamp(2, config.window_size);
        config.oscillating_damping = clamp_unit(config.oscillating_damping);
        config.stable_damping = clamp_unit(config.stable_damping);

        let capacity = config.window_size;
        Self {
            config,
            windows: std::array::from_fn(|_| VecDeque::with_capacity(capacity)),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Record a signal's level at its creation time
    pub fn update(&mut self, signal: &Signal) {
        self.record(signal.signal_type, signal.created_at, signal.level);
    }

    /// Append a sample, evicting the oldest when the window is full
    pub fn record(&mut self, signal_type: SignalType, timestamp: i64, level: f64) {
        let window = &mut self.windows[signal_type.index()];
        if window.len() == self.config.window_size {
            window.pop_front();
        }
        window.push_back(Sample {
            timestamp,
            level: clamp_unit(level),
        });
    }

    /// Compute window statistics for one type
    pub fn analyze(&self, signal_type: SignalType) -> OscillationReport {
        let window = &self.windows[signal_type.index()];
        let n = window.len();

        let mut report = OscillationReport {
            signal_type,
            samples: n,
            mean: 0.0,
            variance: 0.0,
            crossing_rate: 0.0,
            oscillating: false,
        };
        if n == 0 {
            return report;
        }

        let mean = window.iter().map(|s| s.level).sum::<f64>() / n as f64;
        report.mean = mean;
        if n < 2 {
            return report;
        }

        report.variance = window
            .iter()
            .map(|s| (s.level - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;

        let mut crossings = 0usize;
        let mut last_side: Option<bool> = None;
        for sample in window {
            let deviation = sample.level - mean;
            if deviation.abs() < MEAN_EPSILON {
                continue;
            }
            let above = deviation > 0.0;
            if last_side.is_some_and(|side| side != above) {
                crossings += 1;
            }
            last_side = Some(above);
        }
        report.crossing_rate = crossings as f64 / (n - 1) as f64;

        // Insufficient evidence is never a positive verdict
        report.oscillating = n >= self.config.min_samples
            && report.crossing_rate > self.config.crossing_rate_threshold
            && report.variance > self.config.min_variance;

        report
    }

    /// Whether the type is currently oscillating
    pub fn detect_oscillation(&self, signal_type: SignalType) -> bool {
        self.analyze(signal_type).oscillating
    }

    /// Multiplier applied to the next incoming level of this type
    pub fn get_damping_factor(&self, signal_type: SignalType) -> f64 {
        if self.detect_oscillation(signal_type) {
            debug!(%signal_type, damping = self.config.oscillating_damping, "Damping oscillating signal");
            self.config.oscillating_damping
        } else {
            self.config.stable_damping
        }
    }

    /// Types currently oscillating, in precedence order
    pub fn oscillating_types(&self) -> Vec<SignalType> {
        SignalType::ALL
            .into_iter()
            .filter(|t| self.detect_oscillation(*t))
            .collect()
    }

    pub fn any_oscillating(&self) -> bool {
        SignalType::ALL.iter().any(|t| self.detect_oscillation(*t))
    }

    pub fn sample_count(&self, signal_type: SignalType) -> usize {
        self.windows[signal_type.index()].len()
    }

    /// Copy of one window, oldest first
    pub fn samples(&self, signal_type: SignalType) -> Vec<Sample> {
        self.windows[signal_type.index()].iter().copied().collect()
    }

    /// Drop samples taken before `cutoff` from every window.
    ///
    /// Returns the number of samples removed.
    pub fn prune_older_than(&mut self, cutoff: i64) -> usize {
        let mut removed = 0;
        for window in self.windows.iter_mut() {
            while window.front().is_some_and(|s| s.timestamp < cutoff) {
                window.pop_front();
                removed += 1;
            }
        }
        removed
    }

    /// Prune samples older than the configured maximum age as of `now`
    pub fn prune_stale(&mut self, now: i64) -> usize {
        let max_age = i64::try_from(self.config.max_sample_age_ms).unwrap_or(i64::MAX);
        self.prune_older_than(now.saturating_sub(max_age))
    }

    pub fn reset(&mut self, signal_type: SignalType) {
        self.windows[signal_type.index()].clear();
    }

    pub fn clear(&mut self) {
        for window in self.windows.iter_mut() {
            window.clear();
        }
    }
}

impl Default for OscillationDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(detector: &mut OscillationDetector, signal_type: SignalType, levels: &[f64]) {
        for (i, level) in levels.iter().enumerate() {
            detector.record(signal_type, i as i64 * 100, *level);
        }
    }

    #[test]
    fn test_alternating_sequence_oscillates() {
        let mut detector = OscillationDetector::default();
        let levels: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 0.9 } else { 0.1 }).collect();
        feed(&mut detector, SignalType::Stress, &levels);

        let report = detector.analyze(SignalType::Stress);
        assert!(report.oscillating);
        assert!((report.crossing_rate - 1.0).abs() < 1e-9);
        assert!((report.mean - 0.5).abs() < 1e-9);
        assert_eq!(detector.get_damping_factor(SignalType::Stress), 0.3);
    }

    #[test]
    fn test_monotonic_sequence_does_not_oscillate() {
        let mut detector = OscillationDetector::default();
        let levels: Vec<f64> = (0..10).map(|i| i as f64 / 10.0).collect();
        feed(&mut detector, SignalType::Stress, &levels);

        assert!(!detector.detect_oscillation(SignalType::Stress));
        assert_eq!(detector.get_damping_factor(SignalType::Stress), 0.8);
    }

    #[test]
    fn test_constant_sequence_does_not_oscillate() {
        let mut detector = OscillationDetector::default();
        feed(&mut detector, SignalType::Reward, &[0.6; 10]);

        let report = detector.analyze(SignalType::Reward);
        assert!(!report.oscillating);
        assert_eq!(report.variance, 0.0);
        assert_eq!(report.crossing_rate, 0.0);
    }

    #[test]
    fn test_flat_noise_is_not_oscillation() {
        let mut detector = OscillationDetector::default();
        let levels: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 0.51 } else { 0.50 }).collect();
        feed(&mut detector, SignalType::Fatigue, &levels);

        let report = detector.analyze(SignalType::Fatigue);
        assert!(report.crossing_rate > 0.9);
        assert!(!report.oscillating);
    }

    #[test]
    fn test_insufficient_samples() {
        let mut detector = OscillationDetector::default();
        feed(&mut detector, SignalType::Alarm, &[0.9, 0.1, 0.9, 0.1, 0.9]);
        assert!(!detector.detect_oscillation(SignalType::Alarm));
        assert_eq!(detector.get_damping_factor(SignalType::Alarm), 0.8);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let config = DetectorConfig {
            window_size: 4,
            min_samples: 2,
            ..DetectorConfig::default()
        };
        let mut detector = OscillationDetector::new(config);
        feed(&mut detector, SignalType::Stress, &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);

        let samples = detector.samples(SignalType::Stress);
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0].level, 0.3);
    }

    #[test]
    fn test_types_are_independent() {
        let mut detector = OscillationDetector::default();
        let levels: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 0.9 } else { 0.1 }).collect();
        feed(&mut detector, SignalType::Curiosity, &levels);

        assert_eq!(detector.oscillating_types(), vec![SignalType::Curiosity]);
        assert!(!detector.detect_oscillation(SignalType::Stress));
        assert!(detector.any_oscillating());

        detector.reset(SignalType::Curiosity);
        assert!(!detector.any_oscillating());
    }

    #[test]
    fn test_stale_samples_are_pruned() {
        let mut detector = OscillationDetector::default();
        let levels: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 0.9 } else { 0.1 }).collect();
        feed(&mut detector, SignalType::Alarm, &levels);
        assert!(detector.detect_oscillation(SignalType::Alarm));

        assert_eq!(detector.prune_older_than(500), 5);
        assert_eq!(detector.sample_count(SignalType::Alarm), 5);
        assert!(!detector.detect_oscillation(SignalType::Alarm));

        assert_eq!(detector.prune_stale(900 + 60_001), 5);
        assert_eq!(detector.sample_count(SignalType::Alarm), 0);
    }

    #[test]
    fn test_config_is_sanitized() {
        let detector = OscillationDetector::new(DetectorConfig {
            window_size: 0,
            min_samples: 50,
            oscillating_damping: 3.0,
            ..DetectorConfig::default()
        });
        assert_eq!(detector.config().window_size, 2);
        assert_eq!(detector.config().min_samples, 2);
        assert_eq!(detector.config().oscillating_damping, 1.0);
    }
}
