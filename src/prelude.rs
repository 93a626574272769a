//! # multibuffer Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the multibuffer library. Import this module to get quick access to the essential
//! types for building kernels and running the multi-buffering pass.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all multibuffer operations
pub use crate::Error;

/// The result type used throughout multibuffer
pub use crate::Result;

/// Pass and scheduler configuration
pub use crate::config::{MultibufferConfig, SchedulerConfig};

// ================================================================================================
// Kernel IR
// ================================================================================================

/// Functions, modules and their construction API
pub use crate::ir::{Function, FunctionBuilder, Module, RegionBuilder};

/// Identifiers into a function's arenas
pub use crate::ir::{OpId, RegionId, ValueId};

/// Operations and their payloads
pub use crate::ir::{AllocOp, ArithKind, ForOp, MemoryEffects, Op, OpKind};

/// Value types
pub use crate::ir::{AddressSpace, BufferType, ElementType, Type};

/// Positions, use sites and the def-use snapshot
pub use crate::ir::{InsertPoint, Location, UseIndex, UseSite};

// ================================================================================================
// Pass Infrastructure
// ================================================================================================

/// Shared and per-function rewrite state
pub use crate::compiler::{CompilerContext, RewriteContext};

/// Change tracking
pub use crate::compiler::{DerivedStats, Event, EventKind, EventLog};

/// Failure diagnostics
pub use crate::compiler::{Diagnostic, Severity};

/// Pass interface, lookup and execution
pub use crate::compiler::{
    FunctionOutcome, FunctionPass, FunctionStatus, PassRegistry, PassScheduler, PipelineReport,
};

// ================================================================================================
// Multi-buffering
// ================================================================================================

/// The pass and its driver
pub use crate::compiler::passes::multibuffer::{
    DriverReport, DriverState, MultibufferPass, RewriteDriver, SiteOutcome, SiteStatus,
};

/// Individual transformation steps
pub use crate::compiler::passes::multibuffer::{
    expand, locate, refactor, AllocationSite, Discovery, RefactorStrategy,
};

/// The expanded buffer representation
pub use crate::compiler::passes::multibuffer::{ExpandedBufferSet, Slot, SlotOrigin};
