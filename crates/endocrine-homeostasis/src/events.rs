//! Domain event to raw signal mapping
//!
//! Pure: no state is read or written. Levels are passed through unclamped;
//! regulation clamps them.

use endocrine_common::{RawSignal, SignalType};
use serde_json::{Map, Value};

/// Event context: numeric fields keyed by name
pub type EventContext = Map<String, Value>;

/// Event types with built-in mappings
pub const KNOWN_EVENTS: [&str; 10] = [
    "task_failed",
    "task_succeeded",
    "error_rate_spike",
    "security_violation",
    "resource_pressure",
    "timeout",
    "novel_input",
    "drift_detected",
    "low_confidence",
    "consensus_reached",
];

/// Numeric context field, or the default when missing or not a number
pub fn context_f64(context: &EventContext, key: &str, default: f64) -> f64 {
    context.get(key).and_then(Value::as_f64).unwrap_or(default)
}

/// Map a domain event to candidate signals. Unknown event types yield nothing.
pub fn on_event(event_type: &str, context: &EventContext) -> Vec<RawSignal> {
    let source = event_type.trim().to_ascii_lowercase();
    let raw = |signal_type, level| RawSignal::new(signal_type, level, &source);

    match source.as_str() {
        "task_failed" => {
            let failures = context_f64(context, "consecutive_failures", 0.0);
            vec![
                raw(SignalType::Stress, 0.3 + 0.15 * failures),
                raw(SignalType::Uncertainty, 0.4),
            ]
        }
        "task_succeeded" => {
            let quality = context_f64(context, "quality", 0.6);
            vec![
                raw(SignalType::Reward, quality),
                raw(SignalType::Confidence, 0.5 * quality + 0.2),
            ]
        }
        "error_rate_spike" => {
            vec![raw(SignalType::Stress, context_f64(context, "error_rate", 0.7))]
        }
        "security_violation" => {
            let severity = context_f64(context, "severity", 0.9);
            vec![
                raw(SignalType::Alarm, severity),
                raw(SignalType::Stress, 0.5 * severity),
            ]
        }
        "resource_pressure" => {
            vec![raw(SignalType::Fatigue, context_f64(context, "utilization", 0.8))]
        }
        "timeout" => vec![raw(SignalType::Stress, 0.5), raw(SignalType::Fatigue, 0.4)],
        "novel_input" => {
            vec![raw(SignalType::Curiosity, context_f64(context, "novelty", 0.6))]
        }
        "drift_detected" => {
            let magnitude = context_f64(context, "magnitude", 0.5);
            vec![
                raw(SignalType::Uncertainty, magnitude),
                raw(SignalType::Stress, 0.5 * magnitude),
            ]
        }
        "low_confidence" => {
            let confidence = context_f64(context, "confidence", 0.3);
            vec![raw(SignalType::Uncertainty, 1.0 - confidence)]
        }
        "consensus_reached" => {
            vec![raw(SignalType::Confidence, context_f64(context, "agreement", 0.8))]
        }
        _ => Vec::new(),
    }
}
