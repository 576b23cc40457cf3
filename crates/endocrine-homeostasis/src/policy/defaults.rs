//! Built-in policy table
//!
//! Alarm and Stress tighten the request; Fatigue shrinks it; Uncertainty
//! widens retrieval and reasoning; Confidence and Reward relax memory writes;
//! Curiosity loosens sampling when nothing safety-critical is active.

use endocrine_common::{Parameter, SafetyMode, SignalType};

use super::HormonePolicy;
use crate::modulation::{ModulationRule, Predicate, Transform};

pub fn policy_for(signal_type: SignalType) -> HormonePolicy {
    match signal_type {
        SignalType::Alarm => alarm(),
        SignalType::Stress => stress(),
        SignalType::Fatigue => fatigue(),
        SignalType::Uncertainty => uncertainty(),
        SignalType::Confidence => confidence(),
        SignalType::Reward => reward(),
        SignalType::Curiosity => curiosity(),
    }
}

fn alarm() -> HormonePolicy {
    HormonePolicy {
        threshold: 0.1,
        emergency_threshold: Some(0.7),
        cooldown_ms: 1_000,
        ttl_ms: 60_000,
        decay_rate: 0.05,
        max_level: 1.0,
        rules: vec![
            ModulationRule::safety_mode(
                Predicate::IntensityAbove { bound: 0.3 },
                SafetyMode::Strict,
            ),
            ModulationRule::numeric(Parameter::Temperature, Transform::scale(-0.8, 1.0)),
            ModulationRule::numeric(Parameter::TopP, Transform::scale(-0.4, 1.0)),
            ModulationRule::restrict_tools(
                Predicate::IntensityAbove { bound: 0.5 },
                &["search", "read"],
            ),
            ModulationRule::numeric(Parameter::MemoryWriteStrength, Transform::scale(-1.0, 1.0)),
        ],
    }
}

fn stress() -> HormonePolicy {
    HormonePolicy {
        threshold: 0.1,
        emergency_threshold: Some(0.75),
        cooldown_ms: 500,
        ttl_ms: 30_000,
        decay_rate: 0.1,
        max_level: 1.0,
        rules: vec![
            ModulationRule::numeric(Parameter::Temperature, Transform::scale(-0.5, 1.0)),
            ModulationRule::numeric(Parameter::MaxOutputTokens, Transform::scale(-0.5, 1.0)),
            ModulationRule::numeric(Parameter::PlannerBeam, Transform::scale(-0.5, 1.0)),
            ModulationRule::numeric(Parameter::ReasoningEffort, Transform::offset(0.3)),
            ModulationRule::safety_mode(
                Predicate::IntensityAbove { bound: 0.6 },
                SafetyMode::Strict,
            ),
            ModulationRule::restrict_tools(
                Predicate::IntensityAbove { bound: 0.8 },
                &["search", "read", "write"],
            ),
        ],
    }
}

fn fatigue() -> HormonePolicy {
    HormonePolicy {
        threshold: 0.2,
        emergency_threshold: None,
        cooldown_ms: 2_000,
        ttl_ms: 60_000,
        decay_rate: 0.05,
        max_level: 0.9,
        rules: vec![
            ModulationRule::numeric(Parameter::MaxOutputTokens, Transform::scale(-0.4, 1.0)),
            ModulationRule::numeric(Parameter::PlannerBeam, Transform::scale(-0.5, 1.0)),
            ModulationRule::numeric(Parameter::RetrievalK, Transform::scale(-0.4, 1.0)),
        ],
    }
}

fn uncertainty() -> HormonePolicy {
    HormonePolicy {
        threshold: 0.15,
        emergency_threshold: None,
        cooldown_ms: 1_000,
        ttl_ms: 30_000,
        decay_rate: 0.08,
        max_level: 1.0,
        rules: vec![
            ModulationRule::numeric(Parameter::RetrievalK, Transform::offset(6.0)),
            ModulationRule::numeric(Parameter::ReasoningEffort, Transform::offset(0.4)),
            ModulationRule::numeric(Parameter::Temperature, Transform::scale(-0.3, 1.0)),
            ModulationRule::numeric(Parameter::MemoryWriteStrength, Transform::scale(-0.6, 1.0)),
        ],
    }
}

fn confidence() -> HormonePolicy {
    HormonePolicy {
        threshold: 0.2,
        emergency_threshold: None,
        cooldown_ms: 1_000,
        ttl_ms: 30_000,
        decay_rate: 0.05,
        max_level: 1.0,
        rules: vec![
            ModulationRule::numeric(Parameter::MemoryWriteStrength, Transform::offset(0.3)),
            ModulationRule::numeric(Parameter::ReasoningEffort, Transform::offset(-0.2)),
            ModulationRule::numeric(Parameter::RetrievalK, Transform::offset(-2.0)),
        ],
    }
}

fn reward() -> HormonePolicy {
    HormonePolicy {
        threshold: 0.2,
        emergency_threshold: None,
        cooldown_ms: 500,
        ttl_ms: 20_000,
        decay_rate: 0.1,
        max_level: 1.0,
        rules: vec![
            ModulationRule::numeric(Parameter::MemoryWriteStrength, Transform::offset(0.4)),
            ModulationRule::numeric(Parameter::Temperature, Transform::offset(0.1)),
        ],
    }
}

fn curiosity() -> HormonePolicy {
    HormonePolicy {
        threshold: 0.3,
        emergency_threshold: None,
        cooldown_ms: 2_000,
        ttl_ms: 20_000,
        decay_rate: 0.1,
        max_level: 1.0,
        rules: vec![
            // Exploration is suppressed under real stress
            ModulationRule::numeric(
                Parameter::Temperature,
                Transform::conditional(
                    Predicate::SignalAbove {
                        signal: SignalType::Stress,
                        bound: 0.5,
                    },
                    Transform::Current,
                    Transform::offset(0.4),
                ),
            ),
            ModulationRule::numeric(Parameter::TopP, Transform::offset(0.1)),
            ModulationRule::numeric(Parameter::PlannerBeam, Transform::offset(2.0)),
            ModulationRule::safety_mode(
                Predicate::All {
                    of: vec![
                        Predicate::IntensityAbove { bound: 0.7 },
                        Predicate::SignalBelow {
                            signal: SignalType::Stress,
                            bound: 0.3,
                        },
                        Predicate::SignalBelow {
                            signal: SignalType::Alarm,
                            bound: 0.1,
                        },
                    ],
                },
                SafetyMode::Creative,
            ),
        ],
    }
}
