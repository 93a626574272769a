//! Pass infrastructure for kernel IR rewrites.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Rewrite Pipeline                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  CompilerContext              Shared state across functions      │
//! │    ├─ Failure diagnostics     (one per failed function)          │
//! │    ├─ Processed functions                                         │
//! │    └─ EventLog                                                   │
//! │                                                                  │
//! │  PassScheduler               Runs passes over a Module           │
//! │    ├─ Functions in parallel   (rayon, one worker per function)   │
//! │    └─ Passes in order         (per function)                     │
//! │                                                                  │
//! │  FunctionPass trait          Interface for all passes            │
//! │    ├─ run_on_function()       Per-function transformation        │
//! │    ├─ initialize()            One-time setup before pipeline     │
//! │    └─ finalize()              Cleanup after pipeline completes   │
//! │                                                                  │
//! │  PassRegistry                Name → constructor lookup           │
//! │                                                                  │
//! │  Passes                                                          │
//! │    └─ multibuffer             locate → expand → refactor         │
//! │                                                                  │
//! │  EventLog                    Change tracking and diagnostics     │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Functions never share IR, so the scheduler hands each worker exclusive
//! access to one [`crate::ir::Function`]. Everything shared lives in the
//! [`CompilerContext`], which is safe to use from all workers at once.

pub mod context;
pub mod diagnostic;
pub mod events;
pub mod pass;
pub mod passes;
pub mod scheduler;

pub use context::{CompilerContext, RewriteContext};
pub use diagnostic::{Diagnostic, Severity};
pub use events::{DerivedStats, Event, EventBuilder, EventKind, EventLog};
pub use pass::{FunctionPass, PassConstructor, PassInfo, PassRegistry};
pub use passes::MultibufferPass;
pub use scheduler::{FunctionOutcome, FunctionStatus, PassScheduler, PipelineReport};
