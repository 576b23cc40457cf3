//! Modulation parameters - the bounded configuration handed to a downstream
//! generative request builder
//!
//! Parameters are ephemeral: recomputed on every decision cycle and never
//! persisted. Every numeric field is within its [`Bound`] once computed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Tools available when no signal restricts the allowlist
pub const DEFAULT_TOOL_ALLOWLIST: [&str; 5] = ["search", "read", "write", "execute", "browse"];

/// Safety posture of the downstream request.
///
/// Ordered from most to least conservative, so `min` picks the tighter mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyMode {
    Strict,
    Balanced,
    Creative,
}

impl fmt::Display for SafetyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyMode::Strict => write!(f, "strict"),
            SafetyMode::Balanced => write!(f, "balanced"),
            SafetyMode::Creative => write!(f, "creative"),
        }
    }
}

/// Direction in which a parameter becomes more conservative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tightening {
    /// Smaller values are safer
    Lower,
    /// Larger values are safer
    Raise,
}

/// Numeric modulation parameters addressable by transforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    Temperature,
    TopP,
    MaxOutputTokens,
    ReasoningEffort,
    RetrievalK,
    PlannerBeam,
    MemoryWriteStrength,
}

impl Parameter {
    pub const COUNT: usize = 7;

    pub const ALL: [Parameter; Self::COUNT] = [
        Parameter::Temperature,
        Parameter::TopP,
        Parameter::MaxOutputTokens,
        Parameter::ReasoningEffort,
        Parameter::RetrievalK,
        Parameter::PlannerBeam,
        Parameter::MemoryWriteStrength,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Deeper deliberation and more retrieval are the conservative direction;
    /// everything else tightens downward.
    pub const fn tightening(self) -> Tightening {
        match self {
            Parameter::ReasoningEffort | Parameter::RetrievalK => Tightening::Raise,
            _ => Tightening::Lower,
        }
    }

    /// Whether the parameter is stored as an integer
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            Parameter::MaxOutputTokens | Parameter::RetrievalK | Parameter::PlannerBeam
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Parameter::Temperature => "temperature",
            Parameter::TopP => "top_p",
            Parameter::MaxOutputTokens => "max_output_tokens",
            Parameter::ReasoningEffort => "reasoning_effort",
            Parameter::RetrievalK => "retrieval_k",
            Parameter::PlannerBeam => "planner_beam",
            Parameter::MemoryWriteStrength => "memory_write_strength",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive range and default for one numeric parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

impl Bound {
    pub const fn new(min: f64, max: f64, default: f64) -> Self {
        Self { min, max, default }
    }

    /// Clamp into `[min, max]`. NaN maps to `min`.
    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn validate(&self, field: &str) -> Result<(), ConfigurationError> {
        if !(self.min.is_finite() && self.max.is_finite() && self.default.is_finite()) {
            return Err(ConfigurationError::InvalidValue {
                field: field.to_string(),
                value: format!("{:?}", self),
            });
        }
        if self.min > self.max {
            return Err(ConfigurationError::InvalidBounds {
                field: field.to_string(),
                min: self.min,
                max: self.max,
            });
        }
        if !self.contains(self.default) {
            return Err(ConfigurationError::InvalidValue {
                field: format!("{}.default", field),
                value: self.default.to_string(),
            });
        }
        Ok(())
    }
}

/// Bounds for every numeric parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterBounds {
    pub temperature: Bound,
    pub top_p: Bound,
    pub max_output_tokens: Bound,
    pub reasoning_effort: Bound,
    pub retrieval_k: Bound,
    pub planner_beam: Bound,
    pub memory_write_strength: Bound,
}

impl Default for ParameterBounds {
    fn default() -> Self {
        Self {
            temperature: Bound::new(0.0, 1.5, 0.7),
            top_p: Bound::new(0.1, 1.0, 0.9),
            max_output_tokens: Bound::new(256.0, 8192.0, 2048.0),
            reasoning_effort: Bound::new(0.0, 1.0, 0.5),
            retrieval_k: Bound::new(1.0, 20.0, 5.0),
            planner_beam: Bound::new(1.0, 8.0, 3.0),
            memory_write_strength: Bound::new(0.0, 1.0, 0.5),
        }
    }
}

impl ParameterBounds {
    pub fn get(&self, parameter: Parameter) -> &Bound {
        match parameter {
            Parameter::Temperature => &self.temperature,
            Parameter::TopP => &self.top_p,
            Parameter::MaxOutputTokens => &self.max_output_tokens,
            Parameter::ReasoningEffort => &self.reasoning_effort,
            Parameter::RetrievalK => &self.retrieval_k,
            Parameter::PlannerBeam => &self.planner_beam,
            Parameter::MemoryWriteStrength => &self.memory_write_strength,
        }
    }

    /// Check every bound is finite, ordered, and contains its default
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for parameter in Parameter::ALL {
            self.get(parameter).validate(parameter.as_str())?;
        }
        Ok(())
    }
}

/// Concrete parameters for one generative request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModulationParameters {
    pub temperature: f64,
    pub top_p: f64,
    pub max_output_tokens: u32,
    pub reasoning_effort: f64,
    pub retrieval_k: u32,
    pub planner_beam: u32,
    pub memory_write_strength: f64,
    pub safety_mode: SafetyMode,
    pub tool_allowlist: Vec<String>,
}

impl Default for ModulationParameters {
    fn default() -> Self {
        Self::from_bounds(&ParameterBounds::default())
    }
}

impl ModulationParameters {
    /// Baseline parameters: every numeric field at its bound's default
    pub fn from_bounds(bounds: &ParameterBounds) -> Self {
        let mut params = Self {
            temperature: 0.0,
            top_p: 0.0,
            max_output_tokens: 0,
            reasoning_effort: 0.0,
            retrieval_k: 0,
            planner_beam: 0,
            memory_write_strength: 0.0,
            safety_mode: SafetyMode::Balanced,
            tool_allowlist: DEFAULT_TOOL_ALLOWLIST.iter().map(|t| t.to_string()).collect(),
        };
        for parameter in Parameter::ALL {
            params.set(parameter, bounds.get(parameter).default);
        }
        params
    }

    /// Read a numeric field as f64
    pub fn get(&self, parameter: Parameter) -> f64 {
        match parameter {
            Parameter::Temperature => self.temperature,
            Parameter::TopP => self.top_p,
            Parameter::MaxOutputTokens => f64::from(self.max_output_tokens),
            Parameter::ReasoningEffort => self.reasoning_effort,
            Parameter::RetrievalK => f64::from(self.retrieval_k),
            Parameter::PlannerBeam => f64::from(self.planner_beam),
            Parameter::MemoryWriteStrength => self.memory_write_strength,
        }
    }

    /// Write a numeric field; integral fields are rounded and saturated
    pub fn set(&mut self, parameter: Parameter, value: f64) {
        let as_count = || {
            if value.is_finite() {
                value.round().max(0.0).min(f64::from(u32::MAX)) as u32
            } else {
                0
            }
        };
        match parameter {
            Parameter::Temperature => self.temperature = value,
            Parameter::TopP => self.top_p = value,
            Parameter::MaxOutputTokens => self.max_output_tokens = as_count(),
            Parameter::ReasoningEffort => self.reasoning_effort = value,
            Parameter::RetrievalK => self.retrieval_k = as_count(),
            Parameter::PlannerBeam => self.planner_beam = as_count(),
            Parameter::MemoryWriteStrength => self.memory_write_strength = value,
        }
    }

    /// Unconditionally clamp every numeric field into its bound
    pub fn clamp_to(&mut self, bounds: &ParameterBounds) {
        for parameter in Parameter::ALL {
            let bound = bounds.get(parameter);
            let clamped = bound.clamp(self.get(parameter));
            self.set(parameter, clamped);
            // Rounding an integral field can step outside a fractional bound
            if !bound.contains(self.get(parameter)) {
                self.set(parameter, bound.min.ceil());
            }
        }
    }

    /// Whether every numeric field lies within its bound
    pub fn is_within(&self, bounds: &ParameterBounds) -> bool {
        Parameter::ALL
            .iter()
            .all(|p| bounds.get(*p).contains(self.get(*p)))
    }

    /// Whether the allowlist contains a tool
    pub fn allows_tool(&self, tool: &str) -> bool {
        self.tool_allowlist.iter().any(|t| t == tool)
    }
}

impl fmt::Display for ModulationParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "temp={:.2} top_p={:.2} tokens={} effort={:.2} k={} beam={} mem={:.2} mode={} tools=[{}]",
            self.temperature,
            self.top_p,
            self.max_output_tokens,
            self.reasoning_effort,
            self.retrieval_k,
            self.planner_beam,
            self.memory_write_strength,
            self.safety_mode,
            self.tool_allowlist.join(",")
        )
    }
}
