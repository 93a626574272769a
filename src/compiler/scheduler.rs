//! Pass scheduler for running a pipeline over a module.
//!
//! The `PassScheduler` runs an ordered list of [`FunctionPass`]es over every
//! function of a [`Module`]. Functions share no mutable state, so they are
//! processed in parallel with rayon; the passes on one function run in order.

use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::{
    compiler::{
        context::CompilerContext,
        diagnostic::Diagnostic,
        events::{DerivedStats, EventKind},
        pass::FunctionPass,
        pass::PassRegistry,
    },
    config::SchedulerConfig,
    ir::{Function, Module},
    Error, Result,
};

/// Final status of one function after the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionStatus {
    /// No pass changed the function.
    Unchanged,
    /// At least one pass changed the function and none failed.
    Changed,
    /// A pass failed on the function.
    Failed(Diagnostic),
}

/// Outcome of the pipeline on one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionOutcome {
    /// Function name
    pub function: String,
    /// Final status
    pub status: FunctionStatus,
    /// Number of passes that actually ran on the function
    pub passes_run: usize,
}

impl FunctionOutcome {
    /// Returns true if the function failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self.status, FunctionStatus::Failed(_))
    }
}

/// Per-function outcomes of one pipeline run, in module order.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// One outcome per function
    pub outcomes: Vec<FunctionOutcome>,
    /// Wall time of the run
    pub elapsed: Duration,
    /// Statistics over the context's event log, timed with `elapsed`
    pub stats: DerivedStats,
}

impl PipelineReport {
    /// Returns true if no function failed.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        !self.outcomes.iter().any(FunctionOutcome::is_failure)
    }

    /// Outcome of the named function.
    #[must_use]
    pub fn outcome(&self, function: &str) -> Option<&FunctionOutcome> {
        self.outcomes.iter().find(|o| o.function == function)
    }

    /// Outcomes of failed functions.
    pub fn failures(&self) -> impl Iterator<Item = &FunctionOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    /// Number of functions changed without failure.
    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == FunctionStatus::Changed)
            .count()
    }
}

/// Runs a pipeline of passes over the functions of a module.
pub struct PassScheduler {
    config: SchedulerConfig,
    /// Passes in execution order.
    pub passes: Vec<Box<dyn FunctionPass>>,
}

impl Default for PassScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl PassScheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            passes: Vec::new(),
        }
    }

    /// Creates a scheduler running the named passes in order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownPass`] for the first name the registry
    /// does not know.
    pub fn from_names(
        config: SchedulerConfig,
        registry: &PassRegistry,
        names: &[&str],
    ) -> Result<Self> {
        let mut scheduler = Self::new(config);
        for name in names {
            scheduler.passes.push(registry.create(name)?);
        }
        Ok(scheduler)
    }

    /// Appends a pass to the pipeline.
    pub fn add_pass(&mut self, pass: Box<dyn FunctionPass>) -> &mut Self {
        self.passes.push(pass);
        self
    }

    /// The scheduler configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Runs every pass over one function, in pipeline order.
    fn run_function(
        passes: &[Box<dyn FunctionPass>],
        config: &SchedulerConfig,
        func: &mut Function,
        ctx: &CompilerContext,
    ) -> FunctionOutcome {
        let name = func.name().to_string();
        ctx.events
            .record(EventKind::FunctionProcessingStarted)
            .function(name.as_str());

        let mut changed = false;
        let mut passes_run = 0;
        for pass in passes {
            if config.stop_on_failure && ctx.has_failed(&name) {
                break;
            }
            if !pass.should_run(func, ctx) {
                continue;
            }

            ctx.events
                .record(EventKind::PassStarted)
                .function(name.as_str())
                .pass(pass.name());
            passes_run += 1;

            match pass.run_on_function(func, ctx) {
                Ok(pass_changed) => changed |= pass_changed,
                Err(err) => {
                    ctx.report_failure(Diagnostic::error(
                        func.location().clone(),
                        name.as_str(),
                        err.to_string(),
                    ));
                }
            }

            ctx.events
                .record(EventKind::PassCompleted)
                .function(name.as_str())
                .pass(pass.name());
        }

        ctx.mark_processed(&name);
        ctx.events
            .record(EventKind::FunctionProcessingCompleted)
            .function(name.as_str());

        let status = match ctx.failure(&name) {
            Some(diagnostic) => FunctionStatus::Failed(diagnostic),
            None if changed => FunctionStatus::Changed,
            None => FunctionStatus::Unchanged,
        };
        FunctionOutcome {
            function: name,
            status,
            passes_run,
        }
    }

    /// Runs the pipeline over every function of `module`.
    ///
    /// A failure on one function never stops the others; per-function
    /// outcomes are collected in the returned report and failure diagnostics
    /// are also kept in `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateFunction`] before running anything if two
    /// functions of `module` share a name, since failures are tracked per
    /// name. Returns an error if a pass fails to initialize or finalize.
    pub fn run(&mut self, module: &mut Module, ctx: &CompilerContext) -> Result<PipelineReport> {
        if let Some(name) = module.duplicate_name() {
            return Err(Error::DuplicateFunction(name.to_string()));
        }
        let start = Instant::now();

        for pass in &mut self.passes {
            pass.initialize(ctx)?;
        }

        let passes = &self.passes;
        let config = &self.config;
        let outcomes: Vec<FunctionOutcome> = if config.parallel {
            module
                .functions_mut()
                .par_iter_mut()
                .map(|func| Self::run_function(passes, config, func, ctx))
                .collect()
        } else {
            module
                .functions_mut()
                .iter_mut()
                .map(|func| Self::run_function(passes, config, func, ctx))
                .collect()
        };

        for pass in &mut self.passes {
            pass.finalize(ctx)?;
        }

        let elapsed = start.elapsed();
        Ok(PipelineReport {
            outcomes,
            elapsed,
            stats: DerivedStats::from_log(&ctx.events).with_time(elapsed),
        })
    }
}
