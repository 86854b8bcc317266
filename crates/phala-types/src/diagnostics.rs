//! Injectable sink for non-fatal diagnostics (deprecation notices and the
//! like), so nothing in the SDK writes to process-wide output streams.

use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Stable machine-readable code, e.g. `deprecated_field`.
    pub code: &'static str,
    pub message: String,
}

pub trait DiagnosticSink: Send + Sync {
    fn warn(&self, diagnostic: Diagnostic);
}

/// Forwards every diagnostic to `tracing::warn!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn warn(&self, diagnostic: Diagnostic) {
        tracing::warn!(code = diagnostic.code, "{}", diagnostic.message);
    }
}

/// Keeps diagnostics in memory; handy for assertions.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl DiagnosticSink for MemorySink {
    fn warn(&self, diagnostic: Diagnostic) {
        self.entries.lock().push(diagnostic);
    }
}
