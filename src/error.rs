use thiserror::Error;

use crate::ir::{ElementType, OpId};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Transformation Errors
/// - [`Error::InvalidFactor`] - A buffering factor below 1 was requested
/// - [`Error::MissingLoopContext`] - No structured loop qualifies for rotation
/// - [`Error::UnsupportedElementType`] - The element type cannot be replicated per slot
/// - [`Error::EmptySource`] - A refactor was requested on a set with no slots
/// - [`Error::LoopCarriedDependency`] - The buffer is read before being overwritten in the loop
///
/// ## Infrastructure Errors
/// - [`Error::Malformed`] - The IR violates a structural invariant (stale ids, missing regions)
/// - [`Error::UnknownPass`] - A pass name was not found in the registry
/// - [`Error::DuplicateFunction`] - Two functions of a module share a name
/// - [`Error::Error`] - Miscellaneous failures
///
/// # Examples
///
/// ```rust
/// use multibuffer::Error;
///
/// let err = Error::InvalidFactor(0);
/// assert_eq!(err.to_string(), "Invalid buffering factor 0, must be at least 1");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A buffering or refactor factor smaller than 1 was supplied.
    #[error("Invalid buffering factor {0}, must be at least 1")]
    InvalidFactor(i64),

    /// No structured loop encloses every use of the allocation without also
    /// enclosing the allocation itself, so no rotation index can be derived.
    #[error("No enclosing loop provides an iteration counter for {alloc}")]
    MissingLoopContext {
        /// The allocation that could not be expanded
        alloc: OpId,
    },

    /// The element type has no whole-byte width, so slots cannot be indexed safely.
    #[error("Element type {0} cannot be replicated into slots")]
    UnsupportedElementType(ElementType),

    /// A refactor was requested on an expanded set that has no slots.
    #[error("Expanded buffer set is empty, nothing to refactor")]
    EmptySource,

    /// The first access to the buffer inside the loop does not overwrite it
    /// entirely, so a slot would observe data written `factor` iterations ago.
    #[error("{alloc} is read before being overwritten inside the loop")]
    LoopCarriedDependency {
        /// The allocation that could not be expanded
        alloc: OpId,
    },

    /// The IR is structurally inconsistent.
    ///
    /// The error includes the source location where the inconsistency was
    /// detected for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A pass lookup by name failed.
    #[error("No pass registered under the name '{0}'")]
    UnknownPass(String),

    /// Two functions of a module share a symbol name.
    #[error("Function @{0} is defined more than once")]
    DuplicateFunction(String),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
