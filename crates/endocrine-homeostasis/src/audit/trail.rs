//! Bounded audit ring

use std::collections::VecDeque;

use endocrine_common::{ModulationParameters, Signal};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::EventContext;

/// Event that triggered a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_type: String,
    pub context: EventContext,
}

impl EventEnvelope {
    pub fn new(event_type: &str, context: EventContext) -> Self {
        Self {
            event_type: event_type.to_string(),
            context,
        }
    }
}

/// One modulation decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Time-ordered unique id
    pub id: Uuid,

    /// Decision time (Unix millis)
    pub timestamp: i64,

    /// Active signals the decision was computed from
    pub signals_snapshot: Vec<Signal>,

    pub event: EventEnvelope,

    pub resulting_parameters: ModulationParameters,

    pub explanation: String,

    pub oscillation_detected: bool,

    pub emergency_mode: bool,
}

impl AuditRecord {
    pub fn new(
        timestamp: i64,
        event: EventEnvelope,
        signals_snapshot: Vec<Signal>,
        resulting_parameters: ModulationParameters,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp,
            signals_snapshot,
            event,
            resulting_parameters,
            explanation: String::new(),
            oscillation_detected: false,
            emergency_mode: false,
        }
    }

    pub fn with_explanation(mut self, explanation: String) -> Self {
        self.explanation = explanation;
        self
    }

    pub fn with_flags(mut self, oscillation_detected: bool, emergency_mode: bool) -> Self {
        self.oscillation_detected = oscillation_detected;
        self.emergency_mode = emergency_mode;
        self
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Fixed-capacity record ring, oldest evicted first
#[derive(Debug, Clone)]
pub struct AuditTrail {
    records: VecDeque<AuditRecord>,
    capacity: usize,
    total_appended: u64,
}

impl AuditTrail {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            total_appended: 0,
        }
    }

    /// Append a record, returning the evicted one when full
    pub fn append(&mut self, record: AuditRecord) -> Option<AuditRecord> {
        let evicted = if self.records.len() == self.capacity {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        self.total_appended += 1;
        evicted
    }

    /// Up to `n` most recent records, oldest first
    pub fn recent(&self, n: usize) -> Vec<AuditRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn last(&self) -> Option<&AuditRecord> {
        self.records.back()
    }

    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records appended over the trail's lifetime, evicted ones included
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new(crate::DEFAULT_AUDIT_CAPACITY)
    }
}
