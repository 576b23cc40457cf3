//! Error types for the Endocrine control loop
//!
//! Provides a unified error type and the two domain-specific variants that can
//! occur inside the loop. Neither ever escapes `process_event`: configuration
//! problems fall back to built-in defaults and transform failures fall back to
//! the previous parameter value.

use thiserror::Error;

/// Result type alias using EndocrineError
pub type Result<T> = std::result::Result<T, EndocrineError>;

/// Unified error type for Endocrine operations
#[derive(Debug, Error)]
pub enum EndocrineError {
    // Policy / bounds configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigurationError),

    // Transform interpreter errors
    #[error("Transform evaluation error: {0}")]
    Transform(#[from] TransformError),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Malformed configuration detected at load time.
///
/// Non-fatal: the offending entry is skipped and the built-in default is used.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("Unknown signal type: {0}")]
    UnknownSignalType(String),

    #[error("Malformed policy for {signal}: {reason}")]
    MalformedPolicy { signal: String, reason: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Invalid bounds for {field}: min {min} > max {max}")]
    InvalidBounds { field: String, min: f64, max: f64 },
}

/// Failure while evaluating a modulation transform.
///
/// Never raised to callers; the mapper logs it and keeps the previous value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("Transform produced a non-finite value")]
    NonFinite,

    #[error("Transform nesting exceeds depth limit {limit}")]
    DepthExceeded { limit: usize },

    #[error("Clamp bounds inverted: min {min} > max {max}")]
    InvalidClamp { min: f64, max: f64 },

    #[error("Predicate list has {len} entries, limit is {limit}")]
    TooManyPredicates { len: usize, limit: usize },
}

impl From<serde_json::Error> for EndocrineError {
    fn from(err: serde_json::Error) -> Self {
        EndocrineError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for EndocrineError {
    fn from(err: anyhow::Error) -> Self {
        EndocrineError::Internal(err.to_string())
    }
}
