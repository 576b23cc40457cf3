//! # Endocrine Homeostasis
//!
//! The control loop proper: domain events become regulated signals, the
//! active signal set becomes bounded request parameters, and every decision
//! is audited.
//!
//! ## Pipeline
//!
//! 1. [`events::on_event`] maps a domain event to raw signals
//! 2. [`HomeostasisController::regulate`] damps, rate-limits and publishes them
//! 3. [`ModulationMapper`] folds the active set through the [`PolicyTable`]
//! 4. Emergency mode substitutes a conservative override
//! 5. An [`AuditRecord`] captures the decision
//!
//! Background decay and monitor tasks run on tokio intervals.

pub mod audit;
pub mod config;
pub mod controller;
pub mod events;
pub mod modulation;
pub mod policy;
pub mod telemetry;

use endocrine_bus::DetectorConfig;
use endocrine_common::{ModulationParameters, ParameterBounds, SafetyMode};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use audit::{AuditRecord, AuditSink, AuditTrail, EventEnvelope, MemoryAuditSink, TracingAuditSink};
pub use controller::{
    ControlState, ControllerHandle, ControllerStatus, HomeostasisController, MonitorReport,
};
pub use events::{on_event, EventContext, KNOWN_EVENTS};
pub use modulation::{MappingOutcome, ModulationMapper, ModulationRule, Predicate, Transform};
pub use policy::{HormonePolicy, PolicyTable};
pub use telemetry::ControllerMetrics;

/// Source tag of signals published by the monitor task
pub const MONITOR_SOURCE: &str = "monitor";

/// Default audit ring capacity
pub const DEFAULT_AUDIT_CAPACITY: usize = 1_000;

/// Default calm window before emergency mode clears
pub const DEFAULT_EMERGENCY_RECOVERY_MS: u64 = 30_000;

/// Hormone levels below this snap to zero on decay
pub const LEVEL_EPSILON: f64 = 0.001;

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Decay task period
    pub decay_interval_ms: u64,
    /// Monitor task period
    pub monitor_interval_ms: u64,
    /// Calm time required before emergency mode clears
    pub emergency_recovery_ms: u64,
    /// Stress level that counts toward a sustained-stress streak
    pub sustained_stress_level: f64,
    /// Consecutive monitor ticks at that level before emergency
    pub sustained_stress_ticks: u32,
    pub audit_capacity: usize,
    pub detector: DetectorConfig,
    pub bounds: ParameterBounds,
    /// Parameters returned while emergency mode is active
    pub emergency_override: ModulationParameters,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            decay_interval_ms: 1_000,
            monitor_interval_ms: 5_000,
            emergency_recovery_ms: DEFAULT_EMERGENCY_RECOVERY_MS,
            sustained_stress_level: 0.7,
            sustained_stress_ticks: 3,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            detector: DetectorConfig::default(),
            bounds: ParameterBounds::default(),
            emergency_override: conservative_override(),
        }
    }
}

impl ControllerConfig {
    /// Repair values the controller cannot run with
    pub fn sanitized(mut self) -> Self {
        if let Err(err) = self.bounds.validate() {
            warn!(error = %err, "Invalid parameter bounds, using defaults");
            self.bounds = ParameterBounds::default();
        }
        self.emergency_override.clamp_to(&self.bounds);
        self.decay_interval_ms = self.decay_interval_ms.max(1);
        self.monitor_interval_ms = self.monitor_interval_ms.max(1);
        self.sustained_stress_ticks = self.sustained_stress_ticks.max(1);
        self.audit_capacity = self.audit_capacity.max(1);
        if !self.sustained_stress_level.is_finite() {
            self.sustained_stress_level = 0.7;
        }
        self
    }
}

/// Most conservative parameter set: cold sampling, short answers, read-only tools
pub fn conservative_override() -> ModulationParameters {
    ModulationParameters {
        temperature: 0.0,
        top_p: 0.5,
        max_output_tokens: 512,
        reasoning_effort: 1.0,
        retrieval_k: 3,
        planner_beam: 1,
        memory_write_strength: 0.0,
        safety_mode: SafetyMode::Strict,
        tool_allowlist: vec!["read".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use endocrine_common::Bound;

    #[test]
    fn test_default_override_is_within_bounds() {
        let config = ControllerConfig::default().sanitized();
        assert!(config.emergency_override.is_within(&config.bounds));
        assert_eq!(config.emergency_override, conservative_override());
    }

    #[test]
    fn test_invalid_bounds_fall_back() {
        let mut config = ControllerConfig::default();
        config.bounds.temperature = Bound::new(1.0, 0.0, 0.5);
        let config = config.sanitized();
        assert_eq!(config.bounds, ParameterBounds::default());
    }

    #[test]
    fn test_override_clamped_to_narrow_bounds() {
        let mut config = ControllerConfig::default();
        config.bounds.max_output_tokens = Bound::new(1024.0, 4096.0, 2048.0);
        let config = config.sanitized();
        assert_eq!(config.emergency_override.max_output_tokens, 1024);
    }

    #[test]
    fn test_config_deserializes_partially() {
        let config: ControllerConfig =
            serde_json::from_str(r#"{ "emergency_recovery_ms": 500 }"#).unwrap();
        assert_eq!(config.emergency_recovery_ms, 500);
        assert_eq!(config.audit_capacity, DEFAULT_AUDIT_CAPACITY);
    }
}
