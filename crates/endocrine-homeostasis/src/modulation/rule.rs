//! Per-signal modulation rules

use endocrine_common::{Parameter, SafetyMode, TransformError};
use serde::{Deserialize, Serialize};

use super::transform::{Predicate, Transform};

/// One effect a signal type has on the running parameter set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ModulationRule {
    /// Recompute a numeric parameter
    Numeric {
        parameter: Parameter,
        transform: Transform,
    },
    /// Move the safety mode when the predicate holds
    SafetyMode { when: Predicate, mode: SafetyMode },
    /// Intersect the tool allowlist when the predicate holds
    RestrictTools { when: Predicate, allow: Vec<String> },
}

impl ModulationRule {
    pub fn numeric(parameter: Parameter, transform: Transform) -> Self {
        ModulationRule::Numeric {
            parameter,
            transform,
        }
    }

    pub fn safety_mode(when: Predicate, mode: SafetyMode) -> Self {
        ModulationRule::SafetyMode { when, mode }
    }

    pub fn restrict_tools(when: Predicate, allow: &[&str]) -> Self {
        ModulationRule::RestrictTools {
            when,
            allow: allow.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn validate(&self) -> Result<(), TransformError> {
        match self {
            ModulationRule::Numeric { transform, .. } => transform.validate(),
            ModulationRule::SafetyMode { when, .. } | ModulationRule::RestrictTools { when, .. } => {
                when.validate()
            }
        }
    }

    /// Short label used in mapping traces
    pub fn target(&self) -> &'static str {
        match self {
            ModulationRule::Numeric { parameter, .. } => parameter.as_str(),
            ModulationRule::SafetyMode { .. } => "safety_mode",
            ModulationRule::RestrictTools { .. } => "tool_allowlist",
        }
    }
}
