//! Per-signal-type hormone policies
//!
//! A policy fixes how a signal type is regulated (activation threshold,
//! emergency threshold, cooldown, TTL, decay) and which modulation rules it
//! contributes once active.

pub mod defaults;
pub mod table;

use endocrine_common::{ConfigurationError, SignalType, DEFAULT_SIGNAL_TTL_MS};
use serde::{Deserialize, Serialize};

use crate::modulation::ModulationRule;

pub use table::PolicyTable;

/// Regulation and modulation policy for one signal type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HormonePolicy {
    /// Activation level below which the signal does not modulate
    pub threshold: f64,

    /// Crossing this level (safety-critical types only) enters emergency
    #[serde(default, alias = "emergencyThreshold")]
    pub emergency_threshold: Option<f64>,

    /// Minimum spacing between accepted emissions
    #[serde(alias = "cooldownMs")]
    pub cooldown_ms: u64,

    /// Lifetime of signals emitted under this policy
    #[serde(default = "default_ttl", alias = "ttlMs")]
    pub ttl_ms: u64,

    /// Fraction of the hormone level lost per decay tick
    #[serde(alias = "decayRate")]
    pub decay_rate: f64,

    /// Ceiling for a regulated level
    #[serde(default = "default_max_level", alias = "maxLevel")]
    pub max_level: f64,

    #[serde(default, alias = "transforms")]
    pub rules: Vec<ModulationRule>,
}

fn default_ttl() -> u64 {
    DEFAULT_SIGNAL_TTL_MS
}

fn default_max_level() -> f64 {
    1.0
}

impl HormonePolicy {
    /// Check ranges and every rule
    pub fn validate(&self, signal_type: SignalType) -> Result<(), ConfigurationError> {
        let malformed = |reason: String| ConfigurationError::MalformedPolicy {
            signal: signal_type.to_string(),
            reason,
        };

        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(malformed(format!("threshold {} outside [0, 1]", self.threshold)));
        }
        if let Some(emergency) = self.emergency_threshold {
            if !(0.0..=1.0).contains(&emergency) {
                return Err(malformed(format!(
                    "emergency_threshold {} outside [0, 1]",
                    emergency
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.decay_rate) {
            return Err(malformed(format!("decay_rate {} outside [0, 1]", self.decay_rate)));
        }
        if !(self.max_level > 0.0 && self.max_level <= 1.0) {
            return Err(malformed(format!("max_level {} outside (0, 1]", self.max_level)));
        }
        if self.ttl_ms == 0 {
            return Err(malformed("ttl_ms must be positive".to_string()));
        }

        for rule in &self.rules {
            rule.validate()
                .map_err(|e| malformed(format!("{} rule: {}", rule.target(), e)))?;
        }
        Ok(())
    }

    /// Emergency threshold, honoured for safety-critical types only
    pub fn emergency_threshold_for(&self, signal_type: SignalType) -> Option<f64> {
        if signal_type.is_safety_critical() {
            self.emergency_threshold
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modulation::Transform;
    use endocrine_common::Parameter;

    #[test]
    fn test_defaults_validate() {
        for signal_type in SignalType::ALL {
            defaults::policy_for(signal_type)
                .validate(signal_type)
                .unwrap();
        }
    }

    #[test]
    fn test_out_of_range_threshold() {
        let policy = HormonePolicy {
            threshold: 1.5,
            ..defaults::policy_for(SignalType::Stress)
        };
        let err = policy.validate(SignalType::Stress).unwrap_err();
        assert!(matches!(err, ConfigurationError::MalformedPolicy { .. }));
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let policy = HormonePolicy {
            rules: vec![ModulationRule::numeric(
                Parameter::Temperature,
                Transform::clamp(Transform::Current, 0.9, 0.1),
            )],
            ..defaults::policy_for(SignalType::Reward)
        };
        assert!(policy.validate(SignalType::Reward).is_err());
    }

    #[test]
    fn test_emergency_threshold_only_for_safety_critical() {
        let policy = HormonePolicy {
            emergency_threshold: Some(0.5),
            ..defaults::policy_for(SignalType::Curiosity)
        };
        assert_eq!(policy.emergency_threshold_for(SignalType::Curiosity), None);
        assert_eq!(policy.emergency_threshold_for(SignalType::Alarm), Some(0.5));
    }

    #[test]
    fn test_deserialize_camel_case_aliases() {
        let json = serde_json::json!({
            "threshold": 0.2,
            "cooldownMs": 750,
            "decayRate": 0.1,
            "transforms": [
                { "rule": "numeric", "parameter": "temperature",
                  "transform": { "kind": "offset", "slope": 0.1 } }
            ]
        });
        let policy: HormonePolicy = serde_json::from_value(json).unwrap();
        assert_eq!(policy.cooldown_ms, 750);
        assert_eq!(policy.ttl_ms, DEFAULT_SIGNAL_TTL_MS);
        assert_eq!(policy.max_level, 1.0);
        assert_eq!(policy.rules.len(), 1);
    }
}
