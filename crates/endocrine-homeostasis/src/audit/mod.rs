//! Decision audit trail
//!
//! Every `process_event` call leaves one `AuditRecord` in the controller's
//! ring and hands it to the registered sinks once the controller lock has
//! been released.

pub mod sink;
pub mod trail;

pub use sink::{AuditSink, MemoryAuditSink, TracingAuditSink};
pub use trail::{AuditRecord, AuditTrail, EventEnvelope};
