//! User-visible failure reports.

use std::fmt;

use crate::ir::Location;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// The pass failed on the function.
    Error,
    /// Something unexpected happened but the pass succeeded.
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => f.write_str("error"),
            Self::Warning => f.write_str("warning"),
        }
    }
}

/// A diagnostic emitted for one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity
    pub severity: Severity,
    /// Where the diagnostic is reported
    pub location: Location,
    /// The function the diagnostic concerns
    pub function: String,
    /// Message text
    pub message: String,
}

impl Diagnostic {
    /// Creates an error diagnostic.
    #[must_use]
    pub fn error(location: Location, function: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            location,
            function: function.into(),
            message: message.into(),
        }
    }

    /// Returns true if this diagnostic marks a failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}: {} (in @{})",
            self.location, self.severity, self.message, self.function
        )
    }
}
