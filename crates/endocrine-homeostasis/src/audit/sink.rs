//! Outbound audit writers

use parking_lot::RwLock;
use tracing::{info, warn};

use super::trail::AuditRecord;

/// Audit record sink
pub trait AuditSink: Send + Sync {
    /// Write an audit record
    fn write(&self, record: &AuditRecord);

    /// Flush pending records
    fn flush(&self);
}

/// Logs each record through `tracing` (for development)
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn write(&self, record: &AuditRecord) {
        let p = &record.resulting_parameters;
        let log_line = format!(
            "{} {} signals={} temp={:.3} top_p={:.3} tokens={} mode={} - {}",
            record.id,
            record.event.event_type,
            record.signals_snapshot.len(),
            p.temperature,
            p.top_p,
            p.max_output_tokens,
            p.safety_mode,
            if record.explanation.is_empty() {
                "-"
            } else {
                record.explanation.as_str()
            },
        );

        if record.emergency_mode {
            warn!("EMERGENCY: {}", log_line);
        } else {
            info!("{}", log_line);
        }
    }

    fn flush(&self) {
        // Logging is immediate
    }
}

/// Keeps JSON lines in memory until drained
#[derive(Default)]
pub struct MemoryAuditSink {
    buffer: RwLock<Vec<String>>,
    flushes: RwLock<usize>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buffer.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.read().is_empty()
    }

    /// Take every buffered line
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.buffer.write())
    }

    pub fn flush_count(&self) -> usize {
        *self.flushes.read()
    }
}

impl AuditSink for MemoryAuditSink {
    fn write(&self, record: &AuditRecord) {
        self.buffer.write().push(record.to_json());
    }

    fn flush(&self) {
        *self.flushes.write() += 1;
    }
}
