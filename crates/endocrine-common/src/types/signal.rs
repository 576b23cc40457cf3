//! Signal - a named, leveled (0-1), time-bounded event driving regulation
//!
//! Signals are born on the bus via `publish`, and die by TTL expiry. They are
//! never deleted explicitly by callers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::{now_millis, DEFAULT_SIGNAL_TTL_MS, MAX_LEVEL, MIN_LEVEL};

/// Signal kinds, declared in precedence order.
///
/// Safety-critical types come first so that, during modulation, a later and
/// less critical signal can never loosen a bound tightened by an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    /// Security or integrity anomaly
    Alarm,
    /// Failure pressure, error spikes
    Stress,
    /// Resource exhaustion
    Fatigue,
    /// Low confidence, drift
    Uncertainty,
    /// Agreement, verified progress
    Confidence,
    /// Successful outcomes
    Reward,
    /// Novel input worth exploring
    Curiosity,
}

impl SignalType {
    /// Number of signal types
    pub const COUNT: usize = 7;

    /// All types in precedence order
    pub const ALL: [SignalType; Self::COUNT] = [
        SignalType::Alarm,
        SignalType::Stress,
        SignalType::Fatigue,
        SignalType::Uncertainty,
        SignalType::Confidence,
        SignalType::Reward,
        SignalType::Curiosity,
    ];

    /// Position in precedence order, usable as an array index
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether crossing this type's emergency threshold may force emergency mode
    #[inline]
    pub const fn is_safety_critical(self) -> bool {
        matches!(self, SignalType::Alarm | SignalType::Stress)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            SignalType::Alarm => "ALARM",
            SignalType::Stress => "STRESS",
            SignalType::Fatigue => "FATIGUE",
            SignalType::Uncertainty => "UNCERTAINTY",
            SignalType::Confidence => "CONFIDENCE",
            SignalType::Reward => "REWARD",
            SignalType::Curiosity => "CURIOSITY",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        SignalType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigurationError::UnknownSignalType(s.to_string()))
    }
}

/// Clamp a level into `[0, 1]`; non-finite input maps to 0.
#[inline]
pub fn clamp_unit(level: f64) -> f64 {
    if level.is_finite() {
        level.max(MIN_LEVEL).min(MAX_LEVEL)
    } else {
        MIN_LEVEL
    }
}

/// A published signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Signal kind
    pub signal_type: SignalType,

    /// Intensity in [0, 1] once accepted by the bus
    pub level: f64,

    /// Producer identifier (event type, task name, "monitor", ...)
    pub source: String,

    /// Creation time (Unix millis)
    pub created_at: i64,

    /// Time-to-live in milliseconds
    pub ttl_ms: u64,

    /// Minimum spacing between accepted emissions of this type
    pub cooldown_ms: u64,
}

impl Signal {
    /// Create a signal stamped with the current time and the default TTL
    pub fn new(signal_type: SignalType, level: f64) -> Self {
        Self {
            signal_type,
            level,
            source: "unknown".to_string(),
            created_at: now_millis(),
            ttl_ms: DEFAULT_SIGNAL_TTL_MS,
            cooldown_ms: 0,
        }
    }

    /// Set source
    pub fn with_source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    /// Set TTL
    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    /// Set cooldown
    pub fn with_cooldown(mut self, cooldown_ms: u64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    /// Override the creation timestamp
    pub fn created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Instant after which the signal is treated as absent
    #[inline]
    pub fn expires_at(&self) -> i64 {
        self.created_at
            .saturating_add(i64::try_from(self.ttl_ms).unwrap_or(i64::MAX))
    }

    #[inline]
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at()
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:.3}@{}", self.signal_type, self.level, self.source)
    }
}

/// Candidate signal produced from a domain event, before regulation.
///
/// The level is unclamped: event context values are passed through as-is and
/// only bounded by `regulate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    pub signal_type: SignalType,
    pub level: f64,
    pub source: String,
}

impl RawSignal {
    pub fn new(signal_type: SignalType, level: f64, source: &str) -> Self {
        Self {
            signal_type,
            level,
            source: source.to_string(),
        }
    }
}
