//! Observability subsystem.
//!
//! Structured JSON logging, typed lifecycle events, and an append-only
//! audit log.
//!
//! # Principles
//!
//! 1. Observability is read-only: no side effects on engine execution
//! 2. No async or background threads
//! 3. Deterministic output
//! 4. An observability failure must never fail the operation it observes

mod audit;
mod events;
mod logger;

pub use audit::{
    AuditAction, AuditLog, AuditOutcome, AuditRecord, FileAuditLog, MemoryAuditLog,
};
pub use events::Event;
pub use logger::{Logger, Severity};

/// Log a lifecycle event.
pub fn log_event(event: Event) {
    log_event_with_fields(event, &[]);
}

/// Log a lifecycle event with fields.
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    let severity = if event.is_failure() {
        Severity::Warn
    } else {
        Severity::Info
    };
    Logger::log(severity, event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_does_not_panic() {
        log_event(Event::AssociationInitiated);
        log_event_with_fields(Event::WipeCompleted, &[("devices", "3")]);
    }
}
