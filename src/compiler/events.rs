//! Unified event logging for the pass pipeline.
//!
//! This module provides the event log that captures all activity during a
//! pipeline run, from individual use rebindings to pass-level failures.
//! Events can be inspected for debugging or safely ignored when not needed.
//!
//! # Architecture
//!
//! - [`Event`] - A single recorded event (transformation, warning, error, ...)
//! - [`EventLog`] - Collection of events with query and summary capabilities
//! - [`EventBuilder`] - Fluent API for creating events
//!
//! # Example
//!
//! ```rust
//! use multibuffer::compiler::{EventKind, EventLog};
//! use multibuffer::ir::OpId;
//!
//! let log = EventLog::new();
//!
//! log.record(EventKind::SlotsCreated)
//!     .at("gemm_kernel", OpId::new(3))
//!     .message("2 slots of buffer<256xf16, workgroup>");
//!
//! assert_eq!(log.summary(), "1 slots created");
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use crate::ir::OpId;

/// Categories of events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A buffering or refactor directive was read and stripped.
    DirectiveConsumed,
    /// An allocation was replaced by a set of slots.
    SlotsCreated,
    /// A use of an allocation was re-pointed at a slot selector.
    UseRebound,
    /// A rotation index expression was materialised.
    RotationDerived,
    /// A guard barrier was inserted at the top of a loop body.
    GuardInserted,
    /// An existing barrier was adopted as the guard.
    GuardAdopted,
    /// An expanded set changed its slot count in place.
    SlotsRegrouped,
    /// An expanded set was replaced by freshly allocated slots.
    SlotsReallocated,
    /// A slot (and its releases) was erased.
    SlotDiscarded,

    /// A pass started on a function.
    PassStarted,
    /// A pass completed on a function.
    PassCompleted,
    /// Function processing started.
    FunctionProcessingStarted,
    /// Function processing completed.
    FunctionProcessingCompleted,

    /// Informational message.
    Info,
    /// Warning (something unexpected but recoverable).
    Warning,
    /// Error (something failed).
    Error,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            // Transformations
            Self::DirectiveConsumed => "directives consumed",
            Self::SlotsCreated => "slots created",
            Self::UseRebound => "uses rebound",
            Self::RotationDerived => "rotations derived",
            Self::GuardInserted => "guards inserted",
            Self::GuardAdopted => "guards adopted",
            Self::SlotsRegrouped => "sets regrouped",
            Self::SlotsReallocated => "sets reallocated",
            Self::SlotDiscarded => "slots discarded",
            // Engine
            Self::PassStarted => "pass started",
            Self::PassCompleted => "pass completed",
            Self::FunctionProcessingStarted => "function processing started",
            Self::FunctionProcessingCompleted => "function processing completed",
            // Diagnostic
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns true if this event represents an IR transformation.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::DirectiveConsumed
                | Self::SlotsCreated
                | Self::UseRebound
                | Self::RotationDerived
                | Self::GuardInserted
                | Self::GuardAdopted
                | Self::SlotsRegrouped
                | Self::SlotsReallocated
                | Self::SlotDiscarded
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The function where the event occurred (if applicable).
    pub function: Option<String>,
    /// The op the event is about.
    pub location: Option<OpId>,
    /// Human-readable description.
    pub message: String,
    /// Associated pass name (if from a pass).
    pub pass: Option<String>,
}

impl Event {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            function: None,
            location: None,
            message: message.into(),
            pass: None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(function) => write!(f, "[{}] @{}: {}", self.kind, function, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is automatically added
/// to the log when the builder is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    function: Option<String>,
    location: Option<OpId>,
    message: Option<String>,
    pass: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            function: None,
            location: None,
            message: None,
            pass: None,
        }
    }

    /// Sets the function and op where the event occurred.
    pub fn at(mut self, function: impl Into<String>, location: OpId) -> Self {
        self.function = Some(function.into());
        self.location = Some(location);
        self
    }

    /// Sets only the function (for function-level events).
    pub fn function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates this event with a specific pass.
    pub fn pass(mut self, pass_name: impl Into<String>) -> Self {
        self.pass = Some(pass_name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        let event = Event {
            kind: self.kind,
            function: self.function.take(),
            location: self.location.take(),
            message,
            pass: self.pass.take(),
        };

        self.log.events.push(event);
    }
}

/// Collection of events from a pipeline run.
///
/// Statistics are derived from the events rather than tracked separately.
///
/// This type is thread-safe: events can be appended concurrently from
/// multiple threads using shared references (`&self`).
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    ///
    /// The event is automatically added when the builder is dropped.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records a warning message.
    pub fn warn(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Warning, message));
    }

    /// Records an error message.
    pub fn error(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Error, message));
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Returns an iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter_map(move |(_, e)| if e.kind == kind { Some(e) } else { None })
    }

    /// Returns an iterator over events for a specific function.
    pub fn filter_function<'a>(&'a self, function: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.events.iter().filter_map(move |(_, e)| {
            if e.function.as_deref() == Some(function) {
                Some(e)
            } else {
                None
            }
        })
    }

    /// Returns an iterator over warning events.
    pub fn warnings(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Warning)
    }

    /// Returns an iterator over error events.
    pub fn errors(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Error)
    }

    /// Counts events grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the number of unique functions with transformation events.
    #[must_use]
    pub fn functions_affected(&self) -> usize {
        self.events
            .iter()
            .filter(|(_, e)| e.kind.is_transformation())
            .filter_map(|(_, e)| e.function.as_deref())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Generates a human-readable summary of all transformation events.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let counts = self.count_by_kind();

        let mut parts: Vec<String> = counts
            .iter()
            .filter(|(k, _)| k.is_transformation())
            .map(|(kind, count)| format!("{} {}", count, kind.description()))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

/// Statistics derived from an EventLog.
#[derive(Debug, Clone, Default)]
pub struct DerivedStats {
    /// Number of functions that had any transformations.
    pub functions_transformed: usize,
    /// Number of allocations expanded into slots.
    pub allocations_expanded: usize,
    /// Number of uses re-pointed at slot selectors.
    pub uses_rebound: usize,
    /// Number of guard barriers inserted.
    pub guards_inserted: usize,
    /// Number of sets refactored in place.
    pub sets_regrouped: usize,
    /// Number of sets refactored by reallocation.
    pub sets_reallocated: usize,
    /// Number of slots discarded by refactoring.
    pub slots_discarded: usize,
    /// Number of warnings.
    pub warnings: usize,
    /// Number of errors.
    pub errors: usize,
    /// Processing time.
    pub total_time: Duration,
}

impl DerivedStats {
    /// Computes statistics from an event log.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let counts = log.count_by_kind();
        let get = |kind: EventKind| counts.get(&kind).copied().unwrap_or(0);

        Self {
            functions_transformed: log.functions_affected(),
            allocations_expanded: get(EventKind::SlotsCreated),
            uses_rebound: get(EventKind::UseRebound),
            guards_inserted: get(EventKind::GuardInserted),
            sets_regrouped: get(EventKind::SlotsRegrouped),
            sets_reallocated: get(EventKind::SlotsReallocated),
            slots_discarded: get(EventKind::SlotDiscarded),
            warnings: get(EventKind::Warning),
            errors: get(EventKind::Error),
            total_time: Duration::ZERO,
        }
    }

    /// Sets the total processing time.
    #[must_use]
    pub fn with_time(mut self, time: Duration) -> Self {
        self.total_time = time;
        self
    }

    /// Generates a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if self.functions_transformed > 0 {
            parts.push(format!("{} functions", self.functions_transformed));
        }
        if self.allocations_expanded > 0 {
            parts.push(format!("{} allocations expanded", self.allocations_expanded));
        }
        if self.uses_rebound > 0 {
            parts.push(format!("{} uses rebound", self.uses_rebound));
        }
        if self.guards_inserted > 0 {
            parts.push(format!("{} guards", self.guards_inserted));
        }
        if self.sets_regrouped + self.sets_reallocated > 0 {
            parts.push(format!(
                "{} refactored ({} in place)",
                self.sets_regrouped + self.sets_reallocated,
                self.sets_regrouped
            ));
        }
        if self.slots_discarded > 0 {
            parts.push(format!("{} slots discarded", self.slots_discarded));
        }

        if self.errors > 0 {
            parts.push(format!("{} errors", self.errors));
        }
        if self.warnings > 0 {
            parts.push(format!("{} warnings", self.warnings));
        }

        let stats = if parts.is_empty() {
            "no transformations".to_string()
        } else {
            parts.join(", ")
        };

        if self.total_time.as_millis() > 0 {
            format!("{} in {:?}", stats, self.total_time)
        } else {
            stats
        }
    }
}

impl fmt::Display for DerivedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
