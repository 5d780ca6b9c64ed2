//! Observability subsystem
//!
//! - Structured JSON logging with explicit event codes
//! - Monotonic counters
//! - A bounded diagnostics journal surfaced to operators
//!
//! Observability is read-only: a failure to log never changes the outcome
//! of a promotion.

mod diagnostics;
mod events;
mod logger;
mod metrics;

pub use diagnostics::{Diagnostic, DiagnosticBuffer, Diagnostics, DIAGNOSTICS_CAPACITY};
pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log an event at its default severity.
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log an event with fields at its default severity.
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
