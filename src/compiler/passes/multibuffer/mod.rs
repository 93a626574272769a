//! Multi-buffering pass.
//!
//! Replaces an allocation annotated with `multibuffer = N` by `N` physical
//! slots that rotate across the iterations of the innermost loop using it,
//! so that filling the slot of iteration `k + 1` can overlap with computing
//! on the slot of iteration `k`. An optional `remultibuffer = M` directive
//! changes the slot count of the expanded buffer afterwards.
//!
//! # Architecture
//!
//! - [`locator`] - Collects annotated allocations and strips the directives
//! - [`expand`] - Turns one allocation into an [`ExpandedBufferSet`]
//! - [`refactor`] - Changes the slot count of an [`ExpandedBufferSet`]
//! - [`driver`] - Runs the three in order and aggregates the outcome
//!
//! # Directives are consumed on discovery
//!
//! Both directives are removed from the IR when the allocation is found,
//! before any transform runs. A site whose expansion or refactor fails stays
//! unannotated, and running the pass again does not retry it.
//!
//! # Example
//!
//! ```rust
//! use multibuffer::prelude::*;
//!
//! let mut func = FunctionBuilder::new("gemm").build_with(|b| {
//!     let tile = b.alloc_annotated(BufferType::new(ElementType::F16, vec![64]), Some(2), None);
//!     let lb = b.constant(0);
//!     let ub = b.constant(8);
//!     let step = b.constant(1);
//!     b.for_loop(lb, ub, step, |body, iv| {
//!         body.load(tile, vec![iv]);
//!     });
//!     b.dealloc(tile);
//! });
//!
//! let events = EventLog::new();
//! let report = MultibufferPass::default().run(&mut func, &events);
//! assert!(report.succeeded());
//! assert_eq!(report.sets().next().map(ExpandedBufferSet::factor), Some(2));
//! ```

pub mod driver;
pub mod expand;
pub mod locator;
pub mod refactor;
mod rotation;
pub mod set;

pub use driver::{DriverReport, DriverState, RewriteDriver, SiteOutcome, SiteStatus};
pub use expand::expand;
pub use locator::{locate, AllocationSite, Discovery};
pub use refactor::{refactor, RefactorStrategy};
pub use set::{ExpandedBufferSet, Guard, Release, RotationIndex, Slot, SlotOrigin, UseSiteBinding};

use crate::{
    compiler::{
        context::{CompilerContext, RewriteContext},
        events::EventLog,
        pass::FunctionPass,
    },
    config::MultibufferConfig,
    ir::{AllocOp, Function},
    Result,
};

/// The multi-buffering pass.
#[derive(Debug, Clone, Default)]
pub struct MultibufferPass {
    config: MultibufferConfig,
}

impl MultibufferPass {
    /// Registry name.
    pub const NAME: &'static str = "multibuffer";

    /// Registry description.
    pub const DESCRIPTION: &'static str =
        "Expand annotated allocations into rotating multi-buffer slots";

    /// Creates the pass with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the pass with a custom configuration.
    #[must_use]
    pub fn with_config(config: MultibufferConfig) -> Self {
        Self { config }
    }

    /// The pass configuration.
    #[must_use]
    pub fn config(&self) -> &MultibufferConfig {
        &self.config
    }

    /// Runs the driver on `func`, logging to `events`.
    pub fn run(&self, func: &mut Function, events: &EventLog) -> DriverReport {
        let mut ctx = RewriteContext::new(func, events, Self::NAME);
        RewriteDriver::new(&self.config).run(&mut ctx)
    }
}

impl FunctionPass for MultibufferPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        Self::DESCRIPTION
    }

    fn should_run(&self, func: &Function, _ctx: &CompilerContext) -> bool {
        func.ops()
            .any(|(_, op)| op.kind().as_alloc().is_some_and(AllocOp::has_directive))
    }

    fn run_on_function(&self, func: &mut Function, ctx: &CompilerContext) -> Result<bool> {
        let report = self.run(func, &ctx.events);
        if let Some(diagnostic) = report.diagnostic.clone() {
            ctx.report_failure(diagnostic);
        }
        Ok(report.changed())
    }
}
