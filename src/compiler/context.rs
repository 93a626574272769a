//! Shared pipeline state and the per-function rewrite handle.
//!
//! The [`CompilerContext`] holds everything passes share across functions
//! during one pipeline run. It only hands out shared references, so functions
//! can be processed in parallel.
//!
//! The [`RewriteContext`] is the opposite: it is created for one function,
//! owns the exclusive mutation handle to that function's IR, and is threaded
//! explicitly into every rewrite so no transformation reaches for ambient
//! state.

use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};

use crate::{
    compiler::{
        diagnostic::Diagnostic,
        events::{EventBuilder, EventKind, EventLog},
    },
    ir::{Function, OpId},
};

/// Compiler context for one pipeline run.
///
/// All collection fields use thread-safe types (`DashMap`, `DashSet`) so that
/// functions can be processed concurrently.
pub struct CompilerContext {
    /// Accumulated events from all passes.
    pub events: EventLog,

    /// Functions that have been through the whole pipeline.
    pub processed_functions: DashSet<String>,

    /// Failure diagnostics, keyed by function name.
    failures: DashMap<String, Diagnostic>,

    /// When the run started.
    start_time: Instant,
}

impl Default for CompilerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilerContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: EventLog::new(),
            processed_functions: DashSet::new(),
            failures: DashMap::new(),
            start_time: Instant::now(),
        }
    }

    /// Returns the elapsed time since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    // ── Failure tracking ────────────────────────────────────────────────

    /// Records the failure diagnostic of a function, also logging it as an
    /// error event. Only the first failure of a function is kept.
    pub fn report_failure(&self, diagnostic: Diagnostic) {
        self.events
            .record(EventKind::Error)
            .function(diagnostic.function.clone())
            .message(diagnostic.to_string());
        self.failures
            .entry(diagnostic.function.clone())
            .or_insert(diagnostic);
    }

    /// Returns true if the named function failed.
    #[must_use]
    pub fn has_failed(&self, function: &str) -> bool {
        self.failures.contains_key(function)
    }

    /// The failure diagnostic of the named function.
    #[must_use]
    pub fn failure(&self, function: &str) -> Option<Diagnostic> {
        self.failures.get(function).map(|entry| entry.value().clone())
    }

    /// Returns true if any function failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Names of all failed functions, sorted.
    #[must_use]
    pub fn failed_functions(&self) -> Vec<String> {
        let mut names: Vec<_> = self.failures.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    // ── Processing tracking ─────────────────────────────────────────────

    /// Marks a function as processed.
    pub fn mark_processed(&self, function: &str) {
        self.processed_functions.insert(function.to_string());
    }

    /// Checks if a function was processed.
    #[must_use]
    pub fn is_processed(&self, function: &str) -> bool {
        self.processed_functions.contains(function)
    }
}

/// Exclusive rewrite handle for one function.
///
/// Owns the mutable borrow of the function for the duration of a rewrite and
/// tags every recorded event with the function name and the pass.
pub struct RewriteContext<'a> {
    func: &'a mut Function,
    events: &'a EventLog,
    pass: &'static str,
}

impl<'a> RewriteContext<'a> {
    /// Creates a rewrite context for `func`, logging to `events`.
    pub fn new(func: &'a mut Function, events: &'a EventLog, pass: &'static str) -> Self {
        Self { func, events, pass }
    }

    /// The function under rewrite.
    #[must_use]
    pub fn func(&self) -> &Function {
        &*self.func
    }

    /// Mutable access to the function under rewrite.
    pub fn func_mut(&mut self) -> &mut Function {
        &mut *self.func
    }

    /// The event log of the run.
    #[must_use]
    pub fn events(&self) -> &'a EventLog {
        self.events
    }

    /// Name of the pass driving this rewrite.
    #[must_use]
    pub fn pass(&self) -> &'static str {
        self.pass
    }

    /// Starts an event about `op` in this function.
    pub fn record(&self, kind: EventKind, op: OpId) -> EventBuilder<'a> {
        self.events
            .record(kind)
            .at(self.func.name(), op)
            .pass(self.pass)
    }

    /// Logs a warning attached to this function.
    pub fn warn(&self, op: OpId, message: impl Into<String>) {
        self.record(EventKind::Warning, op).message(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Location;

    #[test]
    fn test_first_failure_wins() {
        let ctx = CompilerContext::new();
        ctx.report_failure(Diagnostic::error(Location::Unknown, "k", "first"));
        ctx.report_failure(Diagnostic::error(Location::Unknown, "k", "second"));

        assert!(ctx.has_failed("k"));
        assert!(!ctx.has_failed("other"));
        assert_eq!(ctx.failure("k").unwrap().message, "first");
        assert_eq!(ctx.events.errors().count(), 2);
        assert_eq!(ctx.failed_functions(), vec!["k".to_string()]);
    }

    #[test]
    fn test_rewrite_context_tags_events() {
        let log = EventLog::new();
        let mut func = Function::new("kernel");
        let ctx = RewriteContext::new(&mut func, &log, "multibuffer");
        ctx.warn(OpId::new(2), "odd");

        let event = log.iter().next().unwrap();
        assert_eq!(event.kind, EventKind::Warning);
        assert_eq!(event.function.as_deref(), Some("kernel"));
        assert_eq!(event.pass.as_deref(), Some("multibuffer"));
        assert_eq!(event.location, Some(OpId::new(2)));
    }

    #[test]
    fn test_processed_tracking() {
        let ctx = CompilerContext::new();
        ctx.mark_processed("a");
        assert!(ctx.is_processed("a"));
        assert!(!ctx.is_processed("b"));
    }
}
