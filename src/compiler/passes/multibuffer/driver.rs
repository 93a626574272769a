//! Per-function orchestration of discovery, expansion and refactoring.
//!
//! ```text
//! Idle -> Discovering -> Expanding -+-> Refactoring -+-> Done
//!                                   |                +-> Failed
//!                                   +-> Done
//!                                   +-> Failed
//! ```
//!
//! Every discovered site is expanded in discovery order; a failing site is
//! recorded and the remaining sites are still processed. Sites that expanded
//! and carry a refactor directive are then refactored. Successful rewrites are
//! never rolled back when another site fails.

use strum::Display;

use crate::{
    compiler::{
        context::RewriteContext,
        diagnostic::Diagnostic,
        events::EventKind,
        passes::multibuffer::{
            expand::expand,
            locator::{locate, AllocationSite},
            refactor::refactor,
            set::ExpandedBufferSet,
        },
    },
    config::MultibufferConfig,
    ir::{Location, OpId},
    Error,
};

/// Message of the diagnostic reported for a failed function.
pub const FAILURE_MESSAGE: &str = "Pass failure";

/// States of the rewrite driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum DriverState {
    /// Nothing happened yet.
    Idle,
    /// Collecting annotated allocations.
    Discovering,
    /// Expanding every discovered site.
    Expanding,
    /// Changing the slot count of sites with a refactor directive.
    Refactoring,
    /// Every attempted site succeeded.
    Done,
    /// At least one site failed.
    Failed,
}

impl DriverState {
    /// Returns true if the driver may move from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: DriverState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Discovering)
                | (Self::Discovering, Self::Expanding)
                | (Self::Expanding, Self::Refactoring | Self::Done | Self::Failed)
                | (Self::Refactoring, Self::Done | Self::Failed)
        )
    }

    /// Returns true for `Done` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// What happened to one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteStatus {
    /// Expanded, no refactor requested.
    Expanded(ExpandedBufferSet),
    /// Expanded, then refactored.
    Refactored {
        /// Slot count after expansion
        from: usize,
        /// The final set
        set: ExpandedBufferSet,
    },
    /// Expansion failed; the refactor directive, if any, was dropped.
    ExpansionFailed(Error),
    /// Expansion succeeded but the refactor failed.
    RefactorFailed {
        /// The set as expanded
        set: ExpandedBufferSet,
        /// Why the refactor failed
        error: Error,
    },
}

/// Outcome of one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteOutcome {
    /// The site as discovered
    pub site: AllocationSite,
    /// What happened to it
    pub status: SiteStatus,
}

impl SiteOutcome {
    /// Returns true if every transform attempted on the site succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            SiteStatus::Expanded(_) | SiteStatus::Refactored { .. }
        )
    }

    /// The expanded set the site ended up with, if expansion succeeded.
    #[must_use]
    pub fn set(&self) -> Option<&ExpandedBufferSet> {
        match &self.status {
            SiteStatus::Expanded(set)
            | SiteStatus::Refactored { set, .. }
            | SiteStatus::RefactorFailed { set, .. } => Some(set),
            SiteStatus::ExpansionFailed(_) => None,
        }
    }

    /// The error of the failed transform.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        match &self.status {
            SiteStatus::ExpansionFailed(error) | SiteStatus::RefactorFailed { error, .. } => {
                Some(error)
            }
            _ => None,
        }
    }
}

/// Aggregate result of the driver on one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverReport {
    /// Function name
    pub function: String,
    /// Final state, `Done` or `Failed`
    pub state: DriverState,
    /// Every state visited, in order
    pub history: Vec<DriverState>,
    /// One outcome per discovered site, in discovery order
    pub outcomes: Vec<SiteOutcome>,
    /// Allocations that only carried a refactor directive
    pub orphans: Vec<OpId>,
    /// The failure diagnostic, present iff the state is `Failed`
    pub diagnostic: Option<Diagnostic>,
}

impl DriverReport {
    /// Returns true if the driver reached `Done`.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.state == DriverState::Done
    }

    /// Returns true if the function was modified, directive stripping
    /// included.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.outcomes.is_empty() || !self.orphans.is_empty()
    }

    /// Outcomes of failed sites.
    pub fn failed_sites(&self) -> impl Iterator<Item = &SiteOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_success())
    }

    /// Final expanded sets, in discovery order.
    pub fn sets(&self) -> impl Iterator<Item = &ExpandedBufferSet> {
        self.outcomes.iter().filter_map(SiteOutcome::set)
    }
}

/// Runs discovery, expansion and refactoring over one function.
pub struct RewriteDriver<'c> {
    config: &'c MultibufferConfig,
    state: DriverState,
    history: Vec<DriverState>,
}

impl<'c> RewriteDriver<'c> {
    /// Creates an idle driver.
    #[must_use]
    pub fn new(config: &'c MultibufferConfig) -> Self {
        Self {
            config,
            state: DriverState::Idle,
            history: vec![DriverState::Idle],
        }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> DriverState {
        self.state
    }

    fn transition(&mut self, next: DriverState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid driver transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
        self.history.push(next);
    }

    /// Runs the driver to a terminal state.
    pub fn run(mut self, ctx: &mut RewriteContext<'_>) -> DriverReport {
        self.transition(DriverState::Discovering);
        let discovery = locate(ctx);

        self.transition(DriverState::Expanding);
        let mut outcomes = Vec::with_capacity(discovery.sites.len());
        for site in discovery.sites {
            let status = match expand(ctx, &site, site.factor, self.config) {
                Ok(set) => SiteStatus::Expanded(set),
                Err(error) => {
                    ctx.record(EventKind::Error, site.alloc)
                        .message(format!("expansion failed: {error}"));
                    SiteStatus::ExpansionFailed(error)
                }
            };
            outcomes.push(SiteOutcome { site, status });
        }

        let pending = outcomes.iter().any(|outcome| {
            outcome.site.refactor.is_some() && matches!(outcome.status, SiteStatus::Expanded(_))
        });
        if pending {
            self.transition(DriverState::Refactoring);
            for outcome in &mut outcomes {
                let Some(new_factor) = outcome.site.refactor else {
                    continue;
                };
                let SiteStatus::Expanded(set) = &outcome.status else {
                    continue;
                };
                let from = set.factor();
                let status = match refactor(ctx, set, new_factor, self.config) {
                    Ok(refactored) => SiteStatus::Refactored {
                        from,
                        set: refactored,
                    },
                    Err(error) => {
                        ctx.record(EventKind::Error, outcome.site.alloc)
                            .message(format!("refactor failed: {error}"));
                        SiteStatus::RefactorFailed {
                            set: set.clone(),
                            error,
                        }
                    }
                };
                outcome.status = status;
            }
        }

        let orphan_failure = self.config.fail_on_orphan_refactor && !discovery.orphans.is_empty();
        let failed = orphan_failure || outcomes.iter().any(|outcome| !outcome.is_success());
        let function = ctx.func().name().to_string();
        let diagnostic = if failed {
            self.transition(DriverState::Failed);
            Some(Diagnostic::error(
                Location::Unknown,
                function.as_str(),
                FAILURE_MESSAGE,
            ))
        } else {
            self.transition(DriverState::Done);
            None
        };

        DriverReport {
            function,
            state: self.state,
            history: self.history,
            outcomes,
            orphans: discovery.orphans,
            diagnostic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::events::EventLog,
        ir::{BufferType, ElementType, Function, FunctionBuilder, OpKind},
        test::{paired_tile_kernel, straight_line_kernel, tiled_kernel, TileSpec},
    };

    fn drive(func: &mut Function, config: &MultibufferConfig) -> (DriverReport, EventLog) {
        let log = EventLog::new();
        let report = {
            let mut ctx = RewriteContext::new(func, &log, "multibuffer");
            RewriteDriver::new(config).run(&mut ctx)
        };
        (report, log)
    }

    #[test]
    fn test_transitions() {
        use DriverState::*;
        assert!(Idle.can_transition_to(Discovering));
        assert!(Expanding.can_transition_to(Done));
        assert!(Expanding.can_transition_to(Refactoring));
        assert!(!Idle.can_transition_to(Expanding));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Refactoring.can_transition_to(Expanding));
        assert!(Failed.is_terminal());
        assert_eq!(Refactoring.to_string(), "Refactoring");
    }

    #[test]
    fn test_expand_then_refactor_reaches_done() {
        let mut kernel = tiled_kernel("gemm", TileSpec::default().factor(3).refactor(2));
        let (report, _) = drive(&mut kernel.func, &MultibufferConfig::default());

        assert!(report.succeeded());
        assert_eq!(
            report.history,
            vec![
                DriverState::Idle,
                DriverState::Discovering,
                DriverState::Expanding,
                DriverState::Refactoring,
                DriverState::Done
            ]
        );
        match &report.outcomes[0].status {
            SiteStatus::Refactored { from, set } => {
                assert_eq!(*from, 3);
                assert_eq!(set.factor(), 2);
            }
            other => panic!("unexpected status {other:?}"),
        }
        assert!(report.diagnostic.is_none());
        assert!(kernel.func.verify().is_ok());
    }

    #[test]
    fn test_failing_site_does_not_stop_the_others() {
        let mut func = FunctionBuilder::new("mixed").build_with(|b| {
            let ty = BufferType::new(ElementType::F32, vec![8]);
            let bad = b.alloc_annotated(ty.clone(), Some(0), Some(2));
            let good = b.alloc_annotated(ty, Some(2), None);
            let lb = b.constant(0);
            let ub = b.constant(8);
            let step = b.constant(1);
            b.for_loop(lb, ub, step, |body, iv| {
                let v = body.load(bad, vec![iv]);
                body.store(v, good, vec![iv]);
            });
        });

        let (report, log) = drive(&mut func, &MultibufferConfig::default());
        assert_eq!(report.state, DriverState::Failed);
        assert!(!report.history.contains(&DriverState::Refactoring));
        assert_eq!(
            report.outcomes[0].error(),
            Some(&Error::InvalidFactor(0))
        );
        assert!(report.outcomes[1].is_success());
        assert_eq!(report.failed_sites().count(), 1);
        assert_eq!(report.sets().count(), 1);

        let diagnostic = report.diagnostic.unwrap();
        assert_eq!(diagnostic.message, FAILURE_MESSAGE);
        assert_eq!(diagnostic.location, Location::Unknown);
        assert_eq!(diagnostic.function, "mixed");
        assert_eq!(log.errors().count(), 1);

        // the bad site lost its directives, the good one was rewritten
        assert!(func
            .ops()
            .filter_map(|(_, op)| op.kind().as_alloc())
            .all(|alloc| !alloc.has_directive()));
        assert!(func.verify().is_ok());
    }

    #[test]
    fn test_refactor_failure_keeps_expansion() {
        let mut kernel = tiled_kernel("k", TileSpec::default().factor(2).refactor(-1));
        let (report, _) = drive(&mut kernel.func, &MultibufferConfig::default());
        assert_eq!(report.state, DriverState::Failed);
        match &report.outcomes[0].status {
            SiteStatus::RefactorFailed { set, error } => {
                assert_eq!(*error, Error::InvalidFactor(-1));
                assert_eq!(set.factor(), 2);
            }
            other => panic!("unexpected status {other:?}"),
        }
        assert!(kernel.func.verify().is_ok());
    }

    #[test]
    fn test_missing_loop_fails_function() {
        let (mut func, _, alloc) = straight_line_kernel(2);
        let (report, _) = drive(&mut func, &MultibufferConfig::default());
        assert_eq!(report.state, DriverState::Failed);
        assert_eq!(
            report.outcomes[0].error(),
            Some(&Error::MissingLoopContext { alloc })
        );
        assert!(func.is_live(alloc));
    }

    #[test]
    fn test_nothing_to_do_is_done() {
        let mut func = FunctionBuilder::new("plain").build_with(|b| {
            b.alloc(BufferType::new(ElementType::F32, vec![8]));
        });
        let before = func.to_string();
        let (report, _) = drive(&mut func, &MultibufferConfig::default());
        assert!(report.succeeded());
        assert!(!report.changed());
        assert_eq!(func.to_string(), before);
    }

    #[test]
    fn test_orphan_refactor_policy() {
        let build = || {
            FunctionBuilder::new("orphan").build_with(|b| {
                b.alloc_annotated(BufferType::new(ElementType::F32, vec![8]), None, Some(2));
            })
        };

        let mut lenient = build();
        let (report, log) = drive(&mut lenient, &MultibufferConfig::default());
        assert!(report.succeeded());
        assert!(report.changed());
        assert_eq!(report.orphans.len(), 1);
        assert_eq!(log.warnings().count(), 1);

        let mut strict = build();
        let (report, _) = drive(&mut strict, &MultibufferConfig::strict());
        assert_eq!(report.state, DriverState::Failed);
        assert!(report.outcomes.is_empty());
    }

    #[test]
    fn test_refactor_keeps_guard_of_other_set_in_loop() {
        let (mut func, loop_op) = paired_tile_kernel(2);
        let (report, _) = drive(&mut func, &MultibufferConfig::default());
        assert!(report.succeeded());

        let factors: Vec<usize> = report.sets().map(ExpandedBufferSet::factor).collect();
        assert_eq!(factors, vec![2, 1]);
        assert!(report.outcomes[1].set().unwrap().guard.is_some());
        for guard in report.sets().filter_map(|set| set.guard) {
            assert!(func.is_live(guard.op));
        }

        let body = func.for_op(loop_op).unwrap().body;
        let barriers = func
            .region_ops(body)
            .iter()
            .filter(|op| matches!(func.op(**op).unwrap().kind(), OpKind::Barrier))
            .count();
        assert_eq!(barriers, 1);
        assert!(func.verify().is_ok());
    }
}
