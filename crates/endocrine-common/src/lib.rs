//! # Endocrine Common
//!
//! Shared types, errors, and feedback primitives for the Endocrine control loop.
//!
//! ## Core Types
//!
//! - [`Signal`]: a leveled (0-1), time-bounded signal driving regulation
//! - [`SignalType`]: closed set of signal kinds, ordered by precedence
//! - [`ModulationParameters`]: bounded configuration for a downstream generative request
//! - [`ParameterBounds`]: `[min, max]` range and default for each numeric parameter
//!
//! ## Feedback
//!
//! - [`threshold::AdaptiveThreshold`]: EMA-adjusted decision threshold
//! - [`threshold::ThresholdRegistry`]: named gates sharing adaptive thresholds

pub mod error;
pub mod threshold;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{ConfigurationError, EndocrineError, Result, TransformError};
pub use threshold::{AdaptiveThreshold, ThresholdRegistry};
pub use types::{
    modulation::{
        Bound, ModulationParameters, Parameter, ParameterBounds, SafetyMode, Tightening,
        DEFAULT_TOOL_ALLOWLIST,
    },
    signal::{clamp_unit, RawSignal, Signal, SignalType},
};

/// Endocrine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default signal time-to-live in milliseconds
pub const DEFAULT_SIGNAL_TTL_MS: u64 = 30_000;

/// Lowest valid signal level
pub const MIN_LEVEL: f64 = 0.0;

/// Highest valid signal level
pub const MAX_LEVEL: f64 = 1.0;

/// Current wall-clock time in Unix milliseconds
#[inline]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
