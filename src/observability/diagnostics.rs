//! Operator-facing diagnostics
//!
//! A bounded, in-memory journal of the decisions the coordinator took:
//! why the gate blocked, why a node was excluded, which step failed.
//! The oldest entries are dropped once the journal is full.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::logger::Severity;

/// Default journal capacity.
pub const DIAGNOSTICS_CAPACITY: usize = 256;

/// One diagnostic entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub at: DateTime<Utc>,
    pub severity: &'static str,
    /// Machine-readable code, e.g. `GATE_COOLDOWN` or `NODE_EXCLUDED`.
    pub code: String,
    pub message: String,
}

/// Bounded diagnostics journal.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    entries: VecDeque<Diagnostic>,
    capacity: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::with_capacity(DIAGNOSTICS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(DIAGNOSTICS_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, severity: Severity, code: impl Into<String>, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Diagnostic {
            at: Utc::now(),
            severity: severity.as_str(),
            code: code.into(),
            message: message.into(),
        });
    }

    pub fn extend(&mut self, other: Vec<Diagnostic>) {
        for entry in other {
            if self.entries.len() == self.capacity {
                self.entries.pop_front();
            }
            self.entries.push_back(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<Diagnostic> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.entries.iter().any(|d| d.code == code)
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

/// Collector used by pure functions that must not touch shared state.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticBuffer {
    entries: Vec<Diagnostic>,
}

impl DiagnosticBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, severity: Severity, code: impl Into<String>, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            at: Utc::now(),
            severity: severity.as_str(),
            code: code.into(),
            message: message.into(),
        });
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.entries.iter().any(|d| d.code == code)
    }
}
