//! Pass trait and the pass registry.
//!
//! This module defines the [`FunctionPass`] trait all kernel passes implement,
//! and the [`PassRegistry`] that maps stable pass names to constructors so
//! external tooling can discover and instantiate passes by name.

use std::collections::HashMap;

use crate::{
    compiler::{context::CompilerContext, passes::MultibufferPass},
    ir::Function,
    Error, Result,
};

/// A pass that rewrites one function at a time.
///
/// All passes must be thread-safe (Send + Sync) so the scheduler can run them
/// over independent functions in parallel. Passes receive exclusive access to
/// the function under rewrite and shared access to the compiler context.
pub trait FunctionPass: Send + Sync {
    /// Unique, stable name for logging and tooling discovery.
    fn name(&self) -> &'static str;

    /// Human readable description of what the pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }

    /// Should this pass run on a specific function?
    ///
    /// Called before `run_on_function`. Override to skip functions that
    /// cannot contain anything for this pass.
    fn should_run(&self, _func: &Function, _ctx: &CompilerContext) -> bool {
        true
    }

    /// Runs the pass on a single function.
    ///
    /// Returns `true` if the function was changed. A pass that fails on the
    /// function reports a diagnostic through [`CompilerContext::report_failure`]
    /// and still returns whether it changed anything before failing.
    ///
    /// # Errors
    ///
    /// Returns an error if the IR is malformed in a way the pass cannot
    /// report as an ordinary failure.
    fn run_on_function(&self, func: &mut Function, ctx: &CompilerContext) -> Result<bool>;

    /// Called once before the pass runs over a module.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    fn initialize(&mut self, _ctx: &CompilerContext) -> Result<()> {
        Ok(())
    }

    /// Called once after the pass ran over a module.
    ///
    /// # Errors
    ///
    /// Returns an error if finalization fails.
    fn finalize(&mut self, _ctx: &CompilerContext) -> Result<()> {
        Ok(())
    }
}

/// Constructor of a registered pass.
pub type PassConstructor = fn() -> Box<dyn FunctionPass>;

/// A registry entry.
#[derive(Debug, Clone, Copy)]
pub struct PassInfo {
    /// Stable pass name
    pub name: &'static str,
    /// One-line description
    pub description: &'static str,
    /// Creates the pass with its default configuration
    pub constructor: PassConstructor,
}

/// Maps pass names to constructors.
#[derive(Debug, Default, Clone)]
pub struct PassRegistry {
    entries: HashMap<&'static str, PassInfo>,
}

impl PassRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every pass shipped with the crate.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(PassInfo {
            name: MultibufferPass::NAME,
            description: MultibufferPass::DESCRIPTION,
            constructor: || Box::new(MultibufferPass::default()),
        });
        registry
    }

    /// Registers a pass, replacing any entry with the same name.
    pub fn register(&mut self, info: PassInfo) {
        self.entries.insert(info.name, info);
    }

    /// Looks up a pass by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PassInfo> {
        self.entries.get(name)
    }

    /// Instantiates a pass by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownPass`] if no pass is registered under `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn FunctionPass>> {
        self.get(name)
            .map(|info| (info.constructor)())
            .ok_or_else(|| Error::UnknownPass(name.to_string()))
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Number of registered passes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
