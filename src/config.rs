//! Configuration for the multi-buffering pass and the pass scheduler.
//!
//! Both types are plain structs with a [`Default`] matching the behaviour of
//! the pass when registered without options, plus builder-style `with_*`
//! methods for overriding single fields.

/// Configuration of the multi-buffering rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultibufferConfig {
    /// Skip the check that the first in-loop access fully overwrites the
    /// buffer (default: `true`).
    ///
    /// When the check runs and fails, expansion is rejected with
    /// [`crate::Error::LoopCarriedDependency`].
    pub skip_override_analysis: bool,

    /// Insert a guard barrier at the top of the loop body when slot reuse
    /// could race (default: `true`).
    pub insert_guards: bool,

    /// Pipeline depth assumed for loops without a `pipeline_depth`
    /// annotation (default: 1).
    pub default_pipeline_depth: u32,

    /// Treat a refactor directive on an allocation without a buffering
    /// directive as a failed site instead of a warning (default: `false`).
    pub fail_on_orphan_refactor: bool,
}

impl Default for MultibufferConfig {
    fn default() -> Self {
        Self {
            skip_override_analysis: true,
            insert_guards: true,
            default_pipeline_depth: 1,
            fail_on_orphan_refactor: false,
        }
    }
}

impl MultibufferConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that runs every optional check.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            skip_override_analysis: false,
            fail_on_orphan_refactor: true,
            ..Self::default()
        }
    }

    /// Enables or disables the override analysis.
    #[must_use]
    pub fn with_override_analysis(mut self, enabled: bool) -> Self {
        self.skip_override_analysis = !enabled;
        self
    }

    /// Enables or disables guard insertion.
    #[must_use]
    pub fn with_guards(mut self, enabled: bool) -> Self {
        self.insert_guards = enabled;
        self
    }

    /// Sets the pipeline depth assumed for unannotated loops.
    #[must_use]
    pub fn with_default_pipeline_depth(mut self, depth: u32) -> Self {
        self.default_pipeline_depth = depth;
        self
    }
}

/// Configuration of the pass scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Process the functions of a module in parallel (default: `true`).
    pub parallel: bool,

    /// Stop scheduling further passes on a function once one pass failed on
    /// it (default: `true`).
    pub stop_on_failure: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            stop_on_failure: true,
        }
    }
}

impl SchedulerConfig {
    /// Creates a configuration that processes functions one after another.
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MultibufferConfig::default();
        assert!(config.skip_override_analysis);
        assert!(config.insert_guards);
        assert_eq!(config.default_pipeline_depth, 1);
        assert!(!config.fail_on_orphan_refactor);
        assert!(SchedulerConfig::default().parallel);
    }

    #[test]
    fn test_builders() {
        let config = MultibufferConfig::new()
            .with_override_analysis(true)
            .with_guards(false)
            .with_default_pipeline_depth(3);
        assert!(!config.skip_override_analysis);
        assert!(!config.insert_guards);
        assert_eq!(config.default_pipeline_depth, 3);

        let strict = MultibufferConfig::strict();
        assert!(!strict.skip_override_analysis);
        assert!(strict.fail_on_orphan_refactor);
        assert!(!SchedulerConfig::sequential().parallel);
    }
}
