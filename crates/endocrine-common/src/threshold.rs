//! Adaptive thresholds
//!
//! A decision boundary nudged over time by exponential-moving-average feedback.
//! Used by drift and approval gates that must loosen or tighten without being
//! rebuilt around a fixed constant. Independent of the homeostasis loop, but
//! with the same contract: the adjusted value never leaves `[min, max]`.

use std::collections::VecDeque;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigurationError;

/// Default weight of the newest feedback sample
pub const DEFAULT_EMA_ALPHA: f64 = 0.3;

/// Default number of feedback samples retained
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// EMA-adjusted decision threshold
///
/// Deserialization goes through the same checks as [`AdaptiveThreshold::new`];
/// a stored `current` is ignored and rebuilt from the retained feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ThresholdConfig")]
pub struct AdaptiveThreshold {
    base: f64,
    current: f64,
    min: f64,
    max: f64,
    feedback_history: VecDeque<f64>,
    history_capacity: usize,
    ema_alpha: f64,
}

/// Serialized form of [`AdaptiveThreshold`]
#[derive(Debug, Deserialize)]
struct ThresholdConfig {
    base: f64,
    min: f64,
    max: f64,
    #[serde(default)]
    feedback_history: VecDeque<f64>,
    #[serde(default = "default_history_capacity")]
    history_capacity: usize,
    #[serde(default = "default_ema_alpha")]
    ema_alpha: f64,
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_ema_alpha() -> f64 {
    DEFAULT_EMA_ALPHA
}

impl TryFrom<ThresholdConfig> for AdaptiveThreshold {
    type Error = ConfigurationError;

    fn try_from(config: ThresholdConfig) -> Result<Self, Self::Error> {
        if config.history_capacity == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "history_capacity".to_string(),
                value: "0".to_string(),
            });
        }

        let mut threshold = Self::new(config.base, config.min, config.max)?
            .with_alpha(config.ema_alpha)?
            .with_history(config.history_capacity);
        for score in config.feedback_history {
            if score.is_finite() {
                if threshold.feedback_history.len() == threshold.history_capacity {
                    threshold.feedback_history.pop_front();
                }
                threshold.feedback_history.push_back(score.max(0.0).min(1.0));
            }
        }
        threshold.recompute();
        Ok(threshold)
    }
}

impl AdaptiveThreshold {
    /// Create a threshold starting at `base`, clamped into `[min, max]`
    pub fn new(base: f64, min: f64, max: f64) -> Result<Self, ConfigurationError> {
        if !(base.is_finite() && min.is_finite() && max.is_finite()) {
            return Err(ConfigurationError::InvalidValue {
                field: "threshold".to_string(),
                value: format!("base={} min={} max={}", base, min, max),
            });
        }
        if min > max {
            return Err(ConfigurationError::InvalidBounds {
                field: "threshold".to_string(),
                min,
                max,
            });
        }

        let base = base.max(min).min(max);
        Ok(Self {
            base,
            current: base,
            min,
            max,
            feedback_history: VecDeque::with_capacity(DEFAULT_HISTORY_CAPACITY),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            ema_alpha: DEFAULT_EMA_ALPHA,
        })
    }

    /// Set the EMA weight; must lie in `(0, 1]`
    pub fn with_alpha(mut self, alpha: f64) -> Result<Self, ConfigurationError> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigurationError::InvalidValue {
                field: "ema_alpha".to_string(),
                value: alpha.to_string(),
            });
        }
        self.ema_alpha = alpha;
        self.recompute();
        Ok(self)
    }

    /// Set how many feedback samples are retained (at least one)
    pub fn with_history(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        while self.feedback_history.len() > self.history_capacity {
            self.feedback_history.pop_front();
        }
        self.recompute();
        self
    }

    /// Record a feedback score in `[0, 1]` and return the new threshold.
    ///
    /// Out-of-range scores are clamped; non-finite scores are ignored.
    pub fn add_feedback(&mut self, score: f64) -> f64 {
        if !score.is_finite() {
            warn!(score, "Ignoring non-finite threshold feedback");
            return self.current;
        }

        if self.feedback_history.len() == self.history_capacity {
            self.feedback_history.pop_front();
        }
        self.feedback_history.push_back(score.max(0.0).min(1.0));
        self.recompute();

        debug!(score, current = self.current, "Adaptive threshold updated");
        self.current
    }

    /// Current decision threshold
    #[inline]
    pub fn get_current_threshold(&self) -> f64 {
        self.current
    }

    /// Drop all feedback and return to the baseline
    pub fn reset_to_baseline(&mut self) {
        self.feedback_history.clear();
        self.current = self.base;
    }

    /// Whether `value` clears the current threshold
    #[inline]
    pub fn passes(&self, value: f64) -> bool {
        value >= self.current
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    pub fn ema_alpha(&self) -> f64 {
        self.ema_alpha
    }

    pub fn feedback_count(&self) -> usize {
        self.feedback_history.len()
    }

    /// Retained feedback, oldest first
    pub fn history(&self) -> Vec<f64> {
        self.feedback_history.iter().copied().collect()
    }

    // EMA seeded from the baseline and folded over the retained window, so the
    // result depends only on what is still in history.
    fn recompute(&mut self) {
        let alpha = self.ema_alpha;
        let ema = self
            .feedback_history
            .iter()
            .fold(self.base, |acc, score| alpha * score + (1.0 - alpha) * acc);
        self.current = ema.max(self.min).min(self.max);
    }
}

/// Named adaptive thresholds shared across concurrent gates
#[derive(Debug, Default)]
pub struct ThresholdRegistry {
    gates: DashMap<String, AdaptiveThreshold>,
}

impl ThresholdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a gate
    pub fn register(&self, gate: &str, threshold: AdaptiveThreshold) {
        self.gates.insert(gate.to_string(), threshold);
    }

    /// Feed a score to a gate; `None` if the gate is unknown
    pub fn add_feedback(&self, gate: &str, score: f64) -> Option<f64> {
        self.gates
            .get_mut(gate)
            .map(|mut threshold| threshold.add_feedback(score))
    }

    pub fn current(&self, gate: &str) -> Option<f64> {
        self.gates.get(gate).map(|t| t.get_current_threshold())
    }

    /// Evaluate `value` against a gate; `None` if the gate is unknown
    pub fn passes(&self, gate: &str, value: f64) -> Option<bool> {
        self.gates.get(gate).map(|t| t.passes(value))
    }

    pub fn reset(&self, gate: &str) -> bool {
        match self.gates.get_mut(gate) {
            Some(mut threshold) => {
                threshold.reset_to_baseline();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for mut entry in self.gates.iter_mut() {
            entry.value_mut().reset_to_baseline();
        }
    }

    /// Point-in-time copy of a gate
    pub fn snapshot(&self, gate: &str) -> Option<AdaptiveThreshold> {
        self.gates.get(gate).map(|t| t.clone())
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}
