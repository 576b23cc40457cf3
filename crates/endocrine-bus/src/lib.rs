//! # Endocrine Bus
//!
//! In-memory publish/subscribe store of the most recent, unexpired signal per
//! type, plus the sliding-window oscillation detector that feeds damping.
//!
//! ## Signal Bus
//!
//! - one entry per [`SignalType`](endocrine_common::SignalType), replaced on publish
//! - per-type cooldown: a publish within `cooldown_ms` of the last accepted one is rejected
//! - TTL expiry checked lazily on read, or swept with [`SignalBus::purge_expired`]
//! - subscribers run after the bus lock is released, on a copy of the signal
//!
//! ## Oscillation Detector
//!
//! Oscillating iff the mean-crossing rate exceeds a fraction **and** the
//! sample variance exceeds a floor. Too few samples is never oscillation.

pub mod bus;
pub mod oscillation;

pub use bus::{BusStats, Delivery, SignalBus, SignalHandler, SubscriptionId};
pub use oscillation::{DetectorConfig, OscillationDetector, OscillationReport, Sample};
